//! Reporter - fire-and-forget sender for POST /errors.
//!
//! Sends never block the caller and never fail it; delivery problems are
//! only logged, and only with `debug` enabled.

use crate::config::ReporterSettings;
use crate::error::Result;
use crate::report::{truncate_stack, ErrorReport};
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

struct Inner {
    endpoint: String,
    enabled: bool,
    debug: bool,
    timeout: Duration,
    max_stack_length: usize,
    client: reqwest::Client,
    pending: Mutex<JoinSet<()>>,
}

/// Cheap to clone; clones share pending sends
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<Inner>,
}

impl Reporter {
    pub fn new(settings: &ReporterSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: errors_endpoint(&settings.relay_url),
                enabled: settings.enabled,
                debug: settings.debug,
                timeout: settings.timeout(),
                max_stack_length: settings.max_stack_length,
                client,
                pending: Mutex::new(JoinSet::new()),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Queue `report` for delivery and return immediately
    pub fn report(&self, mut report: ErrorReport) {
        if !self.inner.enabled {
            return;
        }
        if let Some(stack) = report.stack.take() {
            report.stack = Some(truncate_stack(&stack, self.inner.max_stack_length));
        }

        let inner = Arc::clone(&self.inner);
        let send = async move {
            let result = inner
                .client
                .post(&inner.endpoint)
                .json(&report)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = result {
                if inner.debug {
                    warn!("Failed to send error to relay {}: {}", inner.endpoint, e);
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => match self.inner.pending.lock() {
                Ok(mut pending) => {
                    pending.spawn_on(send, &handle);
                    // Reap finished sends
                    while pending.try_join_next().is_some() {}
                }
                Err(_) => {
                    handle.spawn(send);
                }
            },
            Err(_) => {
                debug!("No async runtime, report not sent");
            }
        }
    }

    /// Normalize `err` (Display as message, source chain as stack) and report it
    pub fn report_error(&self, err: &(dyn std::error::Error + 'static), source: Option<&str>) {
        self.report(ErrorReport::from_error(err, source, self.inner.max_stack_length));
    }

    /// Number of sends still running
    pub fn pending_sends(&self) -> usize {
        match self.inner.pending.lock() {
            Ok(mut pending) => {
                while pending.try_join_next().is_some() {}
                pending.len()
            }
            Err(_) => 0,
        }
    }

    /// Wait for every send queued so far
    pub async fn drain(&self) {
        let mut pending = match self.inner.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }

    /// Report panics to the relay before the previously installed hook runs.
    ///
    /// The send is synchronous so the report survives a panic that is about
    /// to abort the process.
    pub fn install_panic_hook(&self) {
        let inner = Arc::clone(&self.inner);
        let previous = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            if inner.enabled {
                let mut report = ErrorReport::new(format!(
                    "panic: {}",
                    payload_message(info.payload())
                ))
                .with_source("panic");
                if let Some(location) = info.location() {
                    let stack = format!(
                        "at {}:{}:{}\n{}",
                        location.file(),
                        location.line(),
                        location.column(),
                        std::backtrace::Backtrace::capture()
                    );
                    report.stack = Some(truncate_stack(stack.trim_end(), inner.max_stack_length));
                }
                send_blocking(&inner, &report);
            }
            previous(info);
        }));
    }

    /// Spawn `fut`, reporting an `Err` outcome with source `task:<label>`
    pub fn spawn_monitored<F, T, E>(&self, label: &str, fut: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let reporter = self.clone();
        let source = format!("task:{}", label);
        tokio::spawn(async move {
            match fut.await {
                Ok(value) => Some(value),
                Err(e) => {
                    let err: anyhow::Error = e.into();
                    let dyn_err: &(dyn std::error::Error + 'static) = err.as_ref();
                    reporter.report_error(dyn_err, Some(&source));
                    None
                }
            }
        })
    }
}

fn errors_endpoint(relay_url: &str) -> String {
    format!("{}/errors", relay_url.trim_end_matches('/'))
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Blocking send on a fresh thread; the panicking thread may be a runtime worker
fn send_blocking(inner: &Inner, report: &ErrorReport) {
    let endpoint = inner.endpoint.clone();
    let timeout = inner.timeout;
    let debug = inner.debug;
    let body = report.clone();

    let sender = std::thread::spawn(move || {
        let result = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .and_then(|client| client.post(&endpoint).json(&body).send())
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            if debug {
                eprintln!("[sonar] Failed to send panic report to {}: {}", endpoint, e);
            }
        }
    });
    let _ = sender.join();
}
