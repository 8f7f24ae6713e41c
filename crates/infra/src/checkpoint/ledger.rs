//! Concurrency-safe wrapper around a [`Ledger`].

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use summarizer_ai::AnalysisOutput;
use summarizer_core::{Item, ItemId, RunId};

use super::types::{FailedItem, Ledger, LedgerStatus, Progress};

/// The in-memory ledger shared by all workers of a run.
///
/// Every method takes the single internal lock, so workers may call them
/// concurrently and readers never observe a partial update.
#[derive(Debug)]
pub struct ProgressLedger {
    inner: Mutex<Ledger>,
}

impl ProgressLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Mutex::new(ledger),
        }
    }

    // A worker that panicked mid-call cannot leave the ledger half-updated:
    // every mutation below completes without calling out.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_processed(&self, item: &Item, result: AnalysisOutput) {
        self.lock().mark_processed(item, result);
    }

    pub fn mark_failed(&self, item: &Item, error: impl Into<String>) {
        self.lock().mark_failed(item, error);
    }

    pub fn add_pending<I>(&self, ids: I)
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.lock().add_pending(ids);
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress()
    }

    /// Consistent copy of the full ledger, for persistence and reporting.
    pub fn snapshot(&self) -> Ledger {
        self.lock().clone()
    }

    pub fn processed_ids(&self) -> BTreeSet<ItemId> {
        self.lock().processed.clone()
    }

    pub fn failed(&self) -> Vec<FailedItem> {
        self.lock().failed.clone()
    }

    pub fn pending(&self) -> BTreeSet<ItemId> {
        self.lock().pending.clone()
    }

    pub fn status(&self) -> LedgerStatus {
        self.lock().status
    }

    pub fn reopen(&self) -> bool {
        self.lock().reopen()
    }

    /// Revise the advisory total. Returns the previous value.
    pub fn set_total_items(&self, total: usize) -> usize {
        std::mem::replace(&mut self.lock().total_items, total)
    }

    pub fn set_run_id(&self, run_id: RunId) {
        self.lock().last_run_id = Some(run_id);
    }

    pub fn finalize(&self) {
        self.lock().finalize();
    }

    /// Stamp `last_updated` and return the snapshot to be written.
    pub(crate) fn stamp_for_save(&self) -> Ledger {
        let mut ledger = self.lock();
        ledger.touch();
        ledger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value as JsonValue;
    use std::sync::Arc;
    use std::thread;
    use summarizer_core::JobKey;

    fn item(n: u8) -> Item {
        Item::new(
            ItemId::new(format!("item-{n}")).unwrap(),
            format!("doc-{n}.pdf"),
            format!("docs/doc-{n}.pdf"),
        )
    }

    fn ledger(total: usize) -> ProgressLedger {
        ProgressLedger::new(Ledger::new(
            JobKey::new("job").unwrap(),
            "Inbox",
            total,
            JsonValue::Null,
        ))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Processed(u8),
        Failed(u8, String),
        Pending(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8).prop_map(Op::Processed),
            (0u8..8, "[a-z]{1,8}").prop_map(|(n, e)| Op::Failed(n, e)),
            (0u8..8).prop_map(Op::Pending),
        ]
    }

    fn apply(l: &ProgressLedger, op: &Op) {
        match op {
            Op::Processed(n) => l.mark_processed(&item(*n), AnalysisOutput::new("ok")),
            Op::Failed(n, e) => l.mark_failed(&item(*n), e.clone()),
            Op::Pending(n) => l.add_pending([item(*n).id]),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn processed_and_failed_never_overlap(ops in prop::collection::vec(op(), 0..64)) {
            let l = ledger(8);
            for op in &ops {
                apply(&l, op);
            }
            let snap = l.snapshot();
            for f in &snap.failed {
                prop_assert!(!snap.processed.contains(&f.item_id));
            }
            let mut ids: Vec<_> = snap.failed.iter().map(|f| f.item_id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), snap.failed.len());
        }

        #[test]
        fn repeated_success_counts_once(n in 0u8..8, times in 1usize..5) {
            let l = ledger(8);
            for _ in 0..times {
                l.mark_processed(&item(n), AnalysisOutput::new("ok"));
            }
            prop_assert_eq!(l.progress().processed, 1);
            prop_assert_eq!(l.snapshot().results.len(), times);
        }

        #[test]
        fn latest_failure_wins(errors in prop::collection::vec("[a-z]{1,8}", 1..6)) {
            let l = ledger(1);
            for e in &errors {
                l.mark_failed(&item(0), e.clone());
            }
            let failed = l.failed();
            prop_assert_eq!(failed.len(), 1);
            prop_assert_eq!(&failed[0].error, errors.last().unwrap());
        }
    }

    #[test]
    fn failure_upsert_keeps_latest_error() {
        let l = ledger(1);
        l.mark_failed(&item(4), "errA");
        l.mark_failed(&item(4), "errB");
        let failed = l.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error, "errB");
    }

    #[test]
    fn progress_matches_counts() {
        let l = ledger(10);
        for n in 0..6 {
            l.mark_processed(&item(n), AnalysisOutput::new("ok"));
        }
        l.mark_failed(&item(6), "boom");

        let p = l.progress();
        assert_eq!(p.processed, 6);
        assert_eq!(p.failed, 1);
        assert_eq!(p.pending, 3);
        assert_eq!(p.percent, 60.0);
    }

    #[test]
    fn add_pending_has_set_semantics() {
        let l = ledger(2);
        l.add_pending([item(1).id, item(1).id, item(2).id]);
        l.add_pending([item(2).id]);
        assert_eq!(l.pending().len(), 2);
    }

    #[test]
    fn concurrent_workers_serialize_mutations() {
        let l = Arc::new(ledger(64));
        let handles: Vec<_> = (0..8u8)
            .map(|w| {
                let l = l.clone();
                thread::spawn(move || {
                    for n in 0..8u8 {
                        let it = item(w * 8 + n);
                        if n % 4 == 0 {
                            l.mark_failed(&it, "boom");
                        } else {
                            l.mark_processed(&it, AnalysisOutput::new("ok"));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let p = l.progress();
        assert_eq!(p.processed, 48);
        assert_eq!(p.failed, 16);
        assert_eq!(p.pending, 0);
        let processed = l.processed_ids();
        assert_eq!(processed.len(), 48);
        assert!(l.failed().iter().all(|f| !processed.contains(&f.item_id)));
    }

    #[test]
    fn set_total_items_returns_previous() {
        let l = ledger(5);
        assert_eq!(l.set_total_items(7), 5);
        assert_eq!(l.progress().total, 7);
    }
}
