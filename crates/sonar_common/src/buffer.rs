//! Error buffer - debounced batching with in-flight deduplication.
//!
//! Reports queue up until the debounce timer expires (each add re-arms it)
//! or the queue reaches `max_size`. A flush hands the batch to the sink on
//! its own task and marks every message in it as in flight; while a message
//! is in flight, new reports with the same text are counted and dropped.
//! Duplicates that arrive before a flush are not collapsed.

use crate::error::Result;
use crate::report::ErrorReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Receiver of flushed batches
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: Vec<ErrorReport>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightStatus {
    Processing,
}

/// Bookkeeping for one message currently being dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightEntry {
    pub message: String,
    pub source: Option<String>,
    pub sent_at: DateTime<Utc>,
    /// Duplicates dropped while this entry was in flight
    pub skipped_count: u64,
    pub status: InFlightStatus,
}

/// What `ErrorBuffer::add` did with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Pending, debounce timer re-armed
    Queued,
    /// Pending list hit `max_size` and was flushed immediately
    Flushed,
    /// Same message already in flight; report dropped
    Skipped { skipped_count: u64 },
}

struct BufferState {
    pending: Vec<ErrorReport>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every re-arm so a superseded timer cannot flush
    timer_generation: u64,
    in_flight: HashMap<String, InFlightEntry>,
}

struct Shared {
    state: Mutex<BufferState>,
    sink: Arc<dyn BatchSink>,
    debounce: Duration,
    max_size: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, batch_id: Uuid, messages: &[String]) {
        let mut state = self.lock();
        for message in messages {
            if let Some(entry) = state.in_flight.remove(message) {
                info!(
                    "Completed: \"{}\" (skipped {} duplicates during processing)",
                    message, entry.skipped_count
                );
            }
        }
        info!(
            "Batch {} settled | remaining in-flight: {}",
            batch_id,
            state.in_flight.len()
        );
    }
}

/// Handle to the error buffer; clones share the same state
#[derive(Clone)]
pub struct ErrorBuffer {
    shared: Arc<Shared>,
}

impl ErrorBuffer {
    /// Must be used from within a tokio runtime
    pub fn new(sink: Arc<dyn BatchSink>, debounce: Duration, max_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BufferState {
                    pending: Vec::new(),
                    timer: None,
                    timer_generation: 0,
                    in_flight: HashMap::new(),
                }),
                sink,
                debounce,
                max_size: max_size.max(1),
            }),
        }
    }

    pub fn add(&self, report: ErrorReport) -> AddOutcome {
        let mut state = self.shared.lock();

        if let Some(entry) = state.in_flight.get_mut(&report.message) {
            entry.skipped_count += 1;
            info!(
                "Skipping duplicate (in-flight): \"{}\" (skipped: {})",
                report.message, entry.skipped_count
            );
            return AddOutcome::Skipped {
                skipped_count: entry.skipped_count,
            };
        }

        state.pending.push(report);

        if state.pending.len() >= self.shared.max_size {
            drop(state);
            self.flush();
            return AddOutcome::Flushed;
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.timer_generation += 1;
        let generation = state.timer_generation;
        let buffer = self.clone();
        let delay = self.shared.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            buffer.flush_if_current(generation);
        }));

        AddOutcome::Queued
    }

    fn flush_if_current(&self, generation: u64) {
        if self.shared.lock().timer_generation == generation {
            self.flush();
        }
    }

    /// Move the pending list into a new in-flight batch and dispatch it.
    ///
    /// Returns the dispatch task, or None when nothing was pending. The task
    /// never needs to be awaited; it clears the batch's in-flight entries
    /// when the sink settles, whether it succeeded or not.
    pub fn flush(&self) -> Option<JoinHandle<()>> {
        let batch_id = Uuid::new_v4();
        let batch = {
            let mut state = self.shared.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if state.pending.is_empty() {
                return None;
            }

            let batch = std::mem::take(&mut state.pending);
            let now = Utc::now();
            for report in &batch {
                state.in_flight.insert(
                    report.message.clone(),
                    InFlightEntry {
                        message: report.message.clone(),
                        source: report.source.clone(),
                        sent_at: now,
                        skipped_count: 0,
                        status: InFlightStatus::Processing,
                    },
                );
            }
            info!(
                "Batch {} in-flight registered: {} error(s) | total in-flight: {}",
                batch_id,
                batch.len(),
                state.in_flight.len()
            );
            batch
        };

        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            let messages: Vec<String> = batch.iter().map(|r| r.message.clone()).collect();
            let sink = Arc::clone(&shared.sink);

            // Run the sink on its own task so a panic still settles the batch
            match tokio::spawn(async move { sink.deliver(batch).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Batch {} delivery failed: {}", batch_id, e),
                Err(e) => warn!("Batch {} delivery task aborted: {}", batch_id, e),
            }

            shared.settle(batch_id, &messages);
        }))
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    pub fn in_flight_entry(&self, message: &str) -> Option<InFlightEntry> {
        self.shared.lock().in_flight.get(message).cloned()
    }

    /// Snapshot of everything in flight, oldest first
    pub fn in_flight_entries(&self) -> Vec<InFlightEntry> {
        let mut entries: Vec<_> = self.shared.lock().in_flight.values().cloned().collect();
        entries.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.message.cmp(&b.message)));
        entries
    }

    pub fn timer_armed(&self) -> bool {
        self.shared
            .lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SonarError;
    use tokio::sync::{mpsc, Semaphore};

    struct RecordingSink {
        tx: mpsc::UnboundedSender<Vec<ErrorReport>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn deliver(&self, batch: Vec<ErrorReport>) -> Result<()> {
            let _ = self.tx.send(batch);
            if self.fail {
                return Err(SonarError::Dispatch("agent unavailable".to_string()));
            }
            Ok(())
        }
    }

    /// Holds every batch until the test releases a permit
    struct GatedSink {
        tx: mpsc::UnboundedSender<Vec<ErrorReport>>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl BatchSink for GatedSink {
        async fn deliver(&self, batch: Vec<ErrorReport>) -> Result<()> {
            let _ = self.tx.send(batch);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(())
        }
    }

    fn recording(
        debounce_ms: u64,
        max_size: usize,
        fail: bool,
    ) -> (ErrorBuffer, mpsc::UnboundedReceiver<Vec<ErrorReport>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = ErrorBuffer::new(
            Arc::new(RecordingSink { tx, fail }),
            Duration::from_millis(debounce_ms),
            max_size,
        );
        (buffer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_flush_duplicates_are_kept() {
        let (buffer, mut rx) = recording(3000, 10, false);

        for _ in 0..3 {
            assert_eq!(buffer.add(ErrorReport::new("X")), AddOutcome::Queued);
        }
        assert_eq!(buffer.pending_len(), 3);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|r| r.message == "X"));
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_add_rearms_debounce() {
        let (buffer, mut rx) = recording(3000, 10, false);

        buffer.add(ErrorReport::new("a"));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        buffer.add(ErrorReport::new("b"));
        tokio::time::sleep(Duration::from_millis(2000)).await;

        // 4s after the first add, but only 2s after the last one
        assert_eq!(buffer.pending_len(), 2);
        assert!(buffer.timer_armed());

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(!buffer.timer_armed());
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let buffer = ErrorBuffer::new(
            Arc::new(GatedSink {
                tx,
                gate: Arc::clone(&gate),
            }),
            Duration::from_secs(3),
            10,
        );

        buffer.add(ErrorReport::new("X").with_source("GET /todos"));
        let handle = buffer.flush().unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        let entry = buffer.in_flight_entry("X").unwrap();
        assert_eq!(entry.skipped_count, 0);
        assert_eq!(entry.status, InFlightStatus::Processing);
        assert_eq!(entry.source.as_deref(), Some("GET /todos"));

        assert_eq!(
            buffer.add(ErrorReport::new("X")),
            AddOutcome::Skipped { skipped_count: 1 }
        );
        assert_eq!(buffer.in_flight_entry("X").unwrap().skipped_count, 1);
        assert_eq!(buffer.pending_len(), 0);
        assert!(!buffer.timer_armed());

        // A different message is unaffected
        assert_eq!(buffer.add(ErrorReport::new("Y")), AddOutcome::Queued);

        gate.add_permits(1);
        handle.await.unwrap();
        assert_eq!(buffer.in_flight_count(), 0);
        assert_eq!(buffer.add(ErrorReport::new("X")), AddOutcome::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_size_flushes_immediately() {
        let (buffer, mut rx) = recording(10_000, 5, false);
        let start = tokio::time::Instant::now();

        for i in 0..4 {
            assert_eq!(buffer.add(ErrorReport::new(format!("e{}", i))), AddOutcome::Queued);
        }
        assert!(buffer.timer_armed());

        assert_eq!(buffer.add(ErrorReport::new("e4")), AddOutcome::Flushed);
        assert!(!buffer.timer_armed());
        assert_eq!(buffer.pending_len(), 0);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 5);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_failed_delivery_still_clears_in_flight() {
        let (buffer, mut rx) = recording(3000, 10, true);

        buffer.add(ErrorReport::new("boom"));
        let handle = buffer.flush().unwrap();
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert_eq!(buffer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (buffer, _rx) = recording(3000, 10, false);
        assert!(buffer.flush().is_none());
        assert_eq!(buffer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_max_size_is_clamped() {
        let (buffer, mut rx) = recording(3000, 0, false);
        assert_eq!(buffer.add(ErrorReport::new("only")), AddOutcome::Flushed);
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }
}
