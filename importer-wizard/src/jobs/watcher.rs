//! Job status polling.
//!
//! One watch at a time: an immediate fetch, then one fetch per interval until the backend
//! reports a terminal status or a fetch fails in transport. Fetches are strictly sequential
//! and a stopped watch never writes to the channel again.

use crate::api::BackendApi;
use crate::error::Result;
use crate::models::job::JobStatusSnapshot;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusSnapshot>;
}

/// Polls `GET /status/{job_id}` through the backend client.
pub struct BackendStatusSource {
    api: Arc<dyn BackendApi>,
}

impl BackendStatusSource {
    pub fn new(api: Arc<dyn BackendApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StatusSource for BackendStatusSource {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusSnapshot> {
        self.api.job_status(job_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchState {
    #[default]
    Idle,
    Polling,
    Terminal,
}

/// What subscribers see: the watcher state plus the latest applied snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchUpdate {
    pub state: WatchState,
    pub job_id: Option<String>,
    pub snapshot: Option<JobStatusSnapshot>,
    /// Snapshots applied during the current watch.
    pub fetches: u32,
    /// Applied snapshots whose percentage was below the one before.
    pub regressions: u32,
}

impl WatchUpdate {
    pub fn percentage(&self) -> u8 {
        self.snapshot.as_ref().map(|s| s.percentage()).unwrap_or(0)
    }
}

struct ActiveWatch {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

pub struct JobStatusWatcher {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    tx: Arc<watch::Sender<WatchUpdate>>,
    active: Mutex<Option<ActiveWatch>>,
}

impl JobStatusWatcher {
    pub fn new(source: Arc<dyn StatusSource>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(WatchUpdate::default());
        Self {
            source,
            interval,
            tx: Arc::new(tx),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchUpdate> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> WatchUpdate {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> WatchState {
        self.tx.borrow().state
    }

    /// Begin watching `job_id`, stopping any active watch first. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        self.stop();

        let token = CancellationToken::new();
        self.tx.send_replace(WatchUpdate {
            state: WatchState::Polling,
            job_id: Some(job_id.clone()),
            snapshot: None,
            fetches: 0,
            regressions: 0,
        });
        info!(
            "[PHASE: import] [STEP: watch] polling job {} every {:?}",
            job_id, self.interval
        );

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            job_id,
            self.interval,
            Arc::clone(&self.tx),
            token.clone(),
        ));

        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(ActiveWatch {
                token,
                _handle: handle,
            });
        }
    }

    /// Idempotent. Polling goes to Idle; Idle and Terminal are left as they are.
    pub fn stop(&self) {
        let active = match self.active.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(active) = active else {
            return;
        };
        active.token.cancel();

        let stopped = self.tx.send_if_modified(|update| {
            if update.state == WatchState::Polling {
                update.state = WatchState::Idle;
                true
            } else {
                false
            }
        });
        if stopped {
            debug!("[PHASE: import] [STEP: watch] watch stopped while polling");
        }
    }
}

impl Drop for JobStatusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Progress is expected to be monotonic within one watch; a drop is reported, not hidden.
fn progress_regressed(previous: Option<&JobStatusSnapshot>, next: &JobStatusSnapshot) -> bool {
    previous.is_some_and(|prev| next.percentage() < prev.percentage())
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    job_id: String,
    interval: Duration,
    tx: Arc<watch::Sender<WatchUpdate>>,
    token: CancellationToken,
) {
    let mut previous: Option<JobStatusSnapshot> = None;

    loop {
        // An in-flight fetch runs to completion; its result is dropped below if stopped.
        let (snapshot, terminal) = match source.fetch_status(&job_id).await {
            Ok(snapshot) => {
                let terminal = snapshot.is_terminal();
                (snapshot, terminal)
            }
            Err(e) => {
                warn!(
                    "[PHASE: import] [STEP: watch] status fetch for job {} failed: {}",
                    job_id,
                    e.log_details()
                );
                (JobStatusSnapshot::fetch_failed(previous.as_ref()), true)
            }
        };

        let regressed = progress_regressed(previous.as_ref(), &snapshot);
        if let (true, Some(prev)) = (regressed, &previous) {
            warn!(
                "[PHASE: import] [STEP: watch] progress regressed for job {}: {}% -> {}%",
                job_id,
                prev.percentage(),
                snapshot.percentage()
            );
        }

        let applied = tx.send_if_modified(|update| {
            if token.is_cancelled() {
                return false;
            }
            update.snapshot = Some(snapshot.clone());
            update.fetches += 1;
            if regressed {
                update.regressions += 1;
            }
            if terminal {
                update.state = WatchState::Terminal;
            }
            true
        });
        if !applied {
            debug!(
                "[PHASE: import] [STEP: watch] discarding status for stopped watch of job {}",
                job_id
            );
            return;
        }

        debug!(
            "[PHASE: import] [STEP: watch] job {} {} {}/{} ({}%)",
            job_id,
            snapshot.status.as_str(),
            snapshot.processed_rows,
            snapshot.total_rows,
            snapshot.percentage()
        );

        if terminal {
            info!(
                "[PHASE: import] [STEP: watch] job {} finished with status {}",
                job_id,
                snapshot.status.as_str()
            );
            return;
        }
        previous = Some(snapshot);

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
