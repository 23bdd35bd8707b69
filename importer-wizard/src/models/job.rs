use serde::{Deserialize, Serialize};

use super::de_count;

/// Message recorded when the status endpoint itself could not be reached.
pub const STATUS_FETCH_FAILED: &str = "status fetch failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    // `pending` is what the backend reports between upload and import start.
    #[serde(alias = "pending", alias = "queued")]
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One poll result from `GET /status/{job_id}`. Superseded by the next fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub status: JobStatus,
    #[serde(default, deserialize_with = "de_count")]
    pub processed_rows: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub total_rows: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub current_batch: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub total_batches: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatusSnapshot {
    pub fn processing(processed_rows: u64, total_rows: u64) -> Self {
        Self {
            status: JobStatus::Processing,
            processed_rows,
            total_rows,
            current_batch: 0,
            total_batches: 0,
            error_message: None,
        }
    }

    /// Synthetic terminal snapshot for a status fetch that failed in transport.
    /// Row counters are carried over from the last good snapshot.
    pub fn fetch_failed(previous: Option<&JobStatusSnapshot>) -> Self {
        let mut snap = previous
            .cloned()
            .unwrap_or_else(|| JobStatusSnapshot::processing(0, 0));
        snap.status = JobStatus::Failed;
        snap.error_message = Some(STATUS_FETCH_FAILED.to_string());
        snap
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `round(100 * processed / total)`, 0 when total is 0, clamped to 100.
    pub fn percentage(&self) -> u8 {
        if self.total_rows == 0 {
            return 0;
        }
        let pct = (self.processed_rows as f64 * 100.0 / self.total_rows as f64).round();
        pct.clamp(0.0, 100.0) as u8
    }
}
