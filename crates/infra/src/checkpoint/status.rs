//! Read-only ledger summaries for operators.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use summarizer_core::{JobKey, RunId};

use super::store::LedgerHandle;
use super::types::{FailedItem, Ledger, LedgerStatus, Progress};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatusReport {
    pub job_key: JobKey,
    pub container_name: String,
    pub ledger_path: PathBuf,
    pub status: LedgerStatus,
    pub progress: Progress,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<RunId>,
    pub failed: Vec<FailedItem>,
}

impl LedgerStatusReport {
    pub fn new(handle: &LedgerHandle, ledger: &Ledger) -> Self {
        Self {
            job_key: ledger.job_key.clone(),
            container_name: ledger.container_name.clone(),
            ledger_path: handle.path.clone(),
            status: ledger.status,
            progress: ledger.progress(),
            started_at: ledger.started_at,
            last_updated: ledger.last_updated,
            completed_at: ledger.completed_at,
            last_run_id: ledger.last_run_id,
            failed: ledger.failed.clone(),
        }
    }

    /// No failures and nothing left to do.
    pub fn is_clean(&self) -> bool {
        self.progress.failed == 0 && self.progress.pending == 0
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        format!(
            "{} [{}] {}: {}/{} processed ({:.1}%), {} failed, {} pending",
            self.job_key,
            self.status.as_str(),
            self.container_name,
            self.progress.processed,
            self.progress.total,
            self.progress.percent,
            self.progress.failed,
            self.progress.pending,
        )
    }
}
