//! Persisted "current connection".
//!
//! The controller only talks to the [`SessionStore`] trait; the file-backed store is the
//! production implementation and the memory store is for tests and `--ephemeral` runs.

use crate::error::{ImporterError, Result};
use crate::models::connection::Connection;
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// Single writer for the persisted connection.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn persist(&self, connection: &Connection) -> Result<()>;

    /// Never validates against the backend. Missing or unreadable state restores as `None`.
    async fn restore(&self) -> Option<Connection>;

    async fn clear(&self) -> Result<()>;
}

/// On-disk layout: one JSON object under the fixed key `connection`.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    connection: Option<Connection>,
}

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomic(&self, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create session directory: {:?}", parent)
                })?;
            }
        }

        let tmp = self.tmp_path();
        let write_action = || async {
            tokio::fs::write(&tmp, bytes)
                .await
                .with_context(|| format!("Failed to write session file: {:?}", tmp))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .with_context(|| format!("Failed to replace session file: {:?}", self.path))?;
            Ok::<(), anyhow::Error>(())
        };

        let retry_strategy = ExponentialBackoff::from_millis(50)
            .factor(2)
            .max_delay(Duration::from_millis(750))
            .take(3)
            .map(jitter);

        RetryIf::spawn(retry_strategy, write_action, is_transient_io_error).await
    }
}

fn is_transient_io_error(err: &anyhow::Error) -> bool {
    let transient_kind = err
        .chain()
        .filter_map(|c| c.downcast_ref::<std::io::Error>())
        .any(|io| {
            matches!(
                io.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
            )
        });
    let msg = format!("{:#}", err).to_ascii_lowercase();
    transient_kind
        || msg.contains("used by another process")
        || msg.contains("sharing violation")
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn persist(&self, connection: &Connection) -> Result<()> {
        let blob = SessionFile {
            connection: Some(connection.clone()),
        };
        let bytes = serde_json::to_vec_pretty(&blob)
            .map_err(|e| ImporterError::Storage(format!("serialize session: {}", e)))?;

        self.write_atomic(&bytes).await.map_err(|e| {
            warn!("[PHASE: session] [STEP: persist] {:#}", e);
            ImporterError::Storage(format!("{:#}", e))
        })?;

        info!(
            "[PHASE: session] [STEP: persist] saved connection {} to {:?}",
            connection.id, self.path
        );
        Ok(())
    }

    async fn restore(&self) -> Option<Connection> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[PHASE: session] [STEP: restore] no session file at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!(
                    "[PHASE: session] [STEP: restore] cannot read {:?}: {}",
                    self.path, e
                );
                return None;
            }
        };

        match serde_json::from_slice::<SessionFile>(&bytes) {
            Ok(file) => file.connection,
            Err(e) => {
                warn!(
                    "[PHASE: session] [STEP: restore] ignoring corrupt session file {:?}: {}",
                    self.path, e
                );
                None
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        for path in [self.path.clone(), self.tmp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("[PHASE: session] [STEP: clear] removed {:?}", path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ImporterError::Storage(format!(
                        "Failed to remove session file {:?}: {}",
                        path, e
                    )))
                }
            }
        }
        Ok(())
    }
}

/// In-process store. Optionally fails writes so callers can exercise the error path.
#[derive(Default)]
pub struct MemorySessionStore {
    current: Mutex<Option<Connection>>,
    fail_writes: AtomicBool,
    persist_calls: AtomicU32,
    clear_calls: AtomicU32,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(connection: Connection) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.current.lock() {
            *slot = Some(connection);
        }
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Option<Connection> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> u32 {
        self.clear_calls.load(Ordering::SeqCst)
    }

    fn write(&self, value: Option<Connection>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ImporterError::Storage("session store is read-only".to_string()));
        }
        let mut slot = self
            .current
            .lock()
            .map_err(|_| ImporterError::Storage("session lock poisoned".to_string()))?;
        *slot = value;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn persist(&self, connection: &Connection) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.write(Some(connection.clone()))
    }

    async fn restore(&self) -> Option<Connection> {
        self.snapshot()
    }

    async fn clear(&self) -> Result<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.write(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Connection {
        Connection::new("c1", "https://x", "u")
    }

    #[tokio::test]
    async fn file_store_round_trips_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));

        assert!(store.restore().await.is_none());
        store.persist(&sample()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["connection"]["id"], "c1");
        assert!(!store.tmp_path().exists());

        let restored = store.restore().await.unwrap();
        assert_eq!(restored.id, "c1");
        assert_eq!(restored.url, "https://x");
        assert_eq!(restored.username, "u");
    }

    #[tokio::test]
    async fn file_store_restores_numeric_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{"connection": {"id": 7, "url": "https://x", "username": "u"}}"#,
        )
        .unwrap();

        let store = FileSessionStore::new(&path);
        assert_eq!(store.restore().await.unwrap().id, "7");
    }

    #[tokio::test]
    async fn corrupt_file_restores_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileSessionStore::new(&path);
        assert!(store.restore().await.is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        store.persist(&sample()).await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.restore().await.is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn memory_store_can_fail_writes() {
        let store = MemorySessionStore::new();
        store.set_fail_writes(true);
        let err = store.persist(&sample()).await.unwrap_err();
        assert!(matches!(err, ImporterError::Storage(_)));
        assert!(store.snapshot().is_none());
        assert_eq!(store.persist_calls(), 1);
    }
}
