//! Remediation session persistence.
//!
//! The remediation client only needs three operations on a single opaque
//! session id. The file store keeps it across relay restarts; the memory
//! store is for tests and one-shot runs.

use crate::error::{Result, SonarError};
use crate::report::now_iso8601;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub trait SessionStore: Send + Sync {
    /// Current session id, if any
    fn get(&self) -> Option<String>;

    /// Store or replace the session id
    fn save(&self, session_id: &str) -> Result<()>;

    /// Forget the session id
    fn reset(&self) -> Result<()>;
}

/// On-disk shape of the session file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    session_id: String,
    updated_at: String,
}

/// JSON-file session store
pub struct FileSessionStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileSessionStore {
    /// Open the store; a missing or unreadable file means no session
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cached = Self::read(&path);
        if let Some(id) = &cached {
            info!("Restored remediation session {} from {}", id, path.display());
        }
        Self {
            path,
            cached: Mutex::new(cached),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<SessionFile>(&content) {
            Ok(file) if !file.session_id.is_empty() => Some(file.session_id),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring corrupt session file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.cached
            .lock()
            .map_err(|_| SonarError::Session("session lock poisoned".to_string()))
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Option<String> {
        self.lock().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, session_id: &str) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&SessionFile {
            session_id: session_id.to_string(),
            updated_at: now_iso8601(),
        })?;
        fs::write(&self.path, content)?;
        *guard = Some(session_id.to_string());
        info!("Saved remediation session {}", session_id);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut guard = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *guard = None;
        info!("Remediation session reset");
        Ok(())
    }
}

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    id: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session_id: &str) -> Self {
        Self {
            id: Mutex::new(Some(session_id.to_string())),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Option<String> {
        self.id.lock().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, session_id: &str) -> Result<()> {
        let mut guard = self
            .id
            .lock()
            .map_err(|_| SonarError::Session("session lock poisoned".to_string()))?;
        *guard = Some(session_id.to_string());
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut guard = self
            .id
            .lock()
            .map_err(|_| SonarError::Session("session lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip_and_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/session.json");

        let store = FileSessionStore::open(&path);
        assert_eq!(store.get(), None);

        store.save("sess-123").unwrap();
        assert_eq!(store.get().as_deref(), Some("sess-123"));

        // A fresh store sees the persisted id
        let reopened = FileSessionStore::open(&path);
        assert_eq!(reopened.get().as_deref(), Some("sess-123"));

        reopened.reset().unwrap();
        assert_eq!(reopened.get(), None);
        assert!(!path.exists());

        // Resetting twice is fine
        reopened.reset().unwrap();
    }

    #[test]
    fn test_file_store_corrupt_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileSessionStore::open(&path);
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::with_session("a");
        assert_eq!(store.get().as_deref(), Some("a"));
        store.save("b").unwrap();
        assert_eq!(store.get().as_deref(), Some("b"));
        store.reset().unwrap();
        assert_eq!(store.get(), None);
    }
}
