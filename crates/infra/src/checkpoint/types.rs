//! Durable job state: the ledger value type and its records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use summarizer_ai::AnalysisOutput;
use summarizer_core::{ContainerId, Item, ItemId, JobKey, RunId};

/// Ledger lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    InProgress,
    Completed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::InProgress => "in_progress",
            LedgerStatus::Completed => "completed",
        }
    }
}

/// Latest failure recorded for an item. At most one per `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: ItemId,
    pub item_name: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// One successful processing of an item.
///
/// Append-only: an item processed in several runs has several records.
/// Readers dedupe by `item_id`, keeping the latest `processed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub item_id: ItemId,
    pub item_name: String,
    #[serde(default)]
    pub item_path: String,
    pub result: AnalysisOutput,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate progress of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// `total - processed - failed`, clamped at zero.
    pub pending: usize,
    /// `processed / total * 100`, or 0 for an empty job.
    pub percent: f64,
}

impl Progress {
    pub fn compute(total: usize, processed: usize, failed: usize) -> Self {
        let pending = total.saturating_sub(processed).saturating_sub(failed);
        let percent = if total == 0 {
            0.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        Self {
            total,
            processed,
            failed,
            pending,
            percent,
        }
    }
}

/// The persisted state of one job.
///
/// Mutation methods keep two invariants: an id is never in both `processed`
/// and `failed`, and `failed` holds at most one entry per id. Concurrent
/// callers go through [`ProgressLedger`](super::ProgressLedger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub job_key: JobKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    pub container_name: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Advisory; revised when the source listing changes between runs.
    pub total_items: usize,
    #[serde(default)]
    pub processed: BTreeSet<ItemId>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
    #[serde(default)]
    pub pending: BTreeSet<ItemId>,
    #[serde(default)]
    pub results: Vec<ResultRecord>,
    /// Run parameters at creation time. Recorded for audit, never enforced.
    #[serde(default)]
    pub config: JsonValue,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<RunId>,
}

impl Ledger {
    pub fn new(
        job_key: JobKey,
        container_name: impl Into<String>,
        total_items: usize,
        config: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_key,
            container_id: None,
            container_name: container_name.into(),
            started_at: now,
            last_updated: now,
            completed_at: None,
            total_items,
            processed: BTreeSet::new(),
            failed: Vec::new(),
            pending: BTreeSet::new(),
            results: Vec::new(),
            config,
            status: LedgerStatus::InProgress,
            last_run_id: None,
        }
    }

    pub fn with_container_id(mut self, container_id: ContainerId) -> Self {
        self.container_id = Some(container_id);
        self
    }

    pub fn mark_processed(&mut self, item: &Item, result: AnalysisOutput) {
        self.processed.insert(item.id.clone());
        self.pending.remove(&item.id);
        self.failed.retain(|f| f.item_id != item.id);
        self.results.push(ResultRecord {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            item_path: item.path.clone(),
            result,
            processed_at: Utc::now(),
        });
    }

    pub fn mark_failed(&mut self, item: &Item, error: impl Into<String>) {
        self.processed.remove(&item.id);
        self.pending.remove(&item.id);
        self.failed.retain(|f| f.item_id != item.id);
        self.failed.push(FailedItem {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            error: error.into(),
            failed_at: Utc::now(),
        });
    }

    pub fn add_pending<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.pending.extend(ids);
    }

    pub fn is_failed(&self, id: &ItemId) -> bool {
        self.failed.iter().any(|f| &f.item_id == id)
    }

    pub fn progress(&self) -> Progress {
        Progress::compute(self.total_items, self.processed.len(), self.failed.len())
    }

    /// Advance `last_updated`, never moving it backwards.
    pub fn touch(&mut self) {
        self.last_updated = self.last_updated.max(Utc::now());
    }

    /// Flip a completed ledger back to in-progress. Returns whether it flipped.
    pub fn reopen(&mut self) -> bool {
        if self.status == LedgerStatus::Completed {
            self.status = LedgerStatus::InProgress;
            self.completed_at = None;
            true
        } else {
            false
        }
    }

    pub fn finalize(&mut self) {
        self.status = LedgerStatus::Completed;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Item {
        Item::new(ItemId::new(id).unwrap(), format!("{id}.pdf"), format!("docs/{id}.pdf"))
    }

    fn ledger(total: usize) -> Ledger {
        Ledger::new(JobKey::new("job").unwrap(), "Inbox", total, JsonValue::Null)
    }

    #[test]
    fn progress_arithmetic() {
        let p = Progress::compute(10, 6, 1);
        assert_eq!(p.pending, 3);
        assert_eq!(p.percent, 60.0);
    }

    #[test]
    fn progress_of_empty_job_is_zero() {
        let p = Progress::compute(0, 0, 0);
        assert_eq!(p.pending, 0);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn pending_is_clamped_when_total_shrinks() {
        let p = Progress::compute(3, 4, 2);
        assert_eq!(p.pending, 0);
    }

    #[test]
    fn processed_item_leaves_failed_and_pending() {
        let mut l = ledger(2);
        let a = item("a");
        l.add_pending([a.id.clone()]);
        l.mark_failed(&a, "boom");
        l.mark_processed(&a, AnalysisOutput::new("ok"));

        assert!(l.processed.contains(&a.id));
        assert!(!l.is_failed(&a.id));
        assert!(l.pending.is_empty());
        assert_eq!(l.results.len(), 1);
        assert_eq!(l.results[0].item_path, "docs/a.pdf");
    }

    #[test]
    fn failed_item_leaves_processed() {
        let mut l = ledger(1);
        let a = item("a");
        l.mark_processed(&a, AnalysisOutput::new("ok"));
        l.mark_failed(&a, "boom");

        assert!(!l.processed.contains(&a.id));
        assert_eq!(l.failed.len(), 1);
        // History of successful outputs is append-only.
        assert_eq!(l.results.len(), 1);
    }

    #[test]
    fn reopen_only_flips_completed() {
        let mut l = ledger(1);
        assert!(!l.reopen());
        l.finalize();
        assert!(l.completed_at.is_some());
        assert!(l.reopen());
        assert_eq!(l.status, LedgerStatus::InProgress);
        assert!(l.completed_at.is_none());
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut l = ledger(1);
        let future = Utc::now() + chrono::Duration::hours(1);
        l.last_updated = future;
        l.touch();
        assert_eq!(l.last_updated, future);
    }

    #[test]
    fn ledger_json_uses_snake_case_status() {
        let l = ledger(0);
        let json = serde_json::to_value(&l).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["job_key"], "job");
        assert!(json["processed"].as_array().unwrap().is_empty());
    }
}
