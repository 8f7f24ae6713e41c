//! Job start, resume and retry-only entry points.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use summarizer_ai::{AnalysisSettings, ItemProcessor, RetryClassifier};
use summarizer_core::{ContainerId, ContainerRef, Item, ItemId, JobKey, RunId};

use super::checkpointer::Checkpointer;
use super::coordinator::{BatchCoordinator, ExecutionSummary, ItemOutcome};
use crate::checkpoint::{
    FsLedgerStore, Ledger, LedgerHandle, LedgerStore, LedgerStoreError, ProgressLedger,
};
use crate::config::{BatchConfig, ConfigError, CorruptLedgerPolicy};
use crate::source::{FetchGate, ItemEnumerator, ItemFetcher, ItemLister, SourceError};

/// Container name used when none is given and the source cannot tell.
pub const UNKNOWN_CONTAINER_NAME: &str = "Unknown";

/// Reconciliation of a ledger against a live listing.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPlan {
    /// Live items not yet processed, in listing order.
    pub work: Vec<Item>,
    /// Failed or pending ids no longer present in the listing.
    pub orphaned: Vec<ItemId>,
    /// Live items already processed by an earlier run.
    pub already_processed: usize,
}

/// Work set for a start or resume: every live item not in `processed`.
///
/// Previously failed and previously pending items are retried alike.
pub fn plan_work(ledger: &Ledger, live: &[Item]) -> WorkPlan {
    let (done, work): (Vec<&Item>, Vec<&Item>) =
        live.iter().partition(|item| ledger.processed.contains(&item.id));
    WorkPlan {
        work: work.into_iter().cloned().collect(),
        orphaned: orphaned(ledger, live),
        already_processed: done.len(),
    }
}

/// Work set for a retry-only run: live items in `failed ∪ pending`.
pub fn plan_retry(ledger: &Ledger, live: &[Item]) -> WorkPlan {
    let targets = retry_targets(ledger);
    WorkPlan {
        work: live
            .iter()
            .filter(|item| targets.contains(&item.id))
            .cloned()
            .collect(),
        orphaned: orphaned(ledger, live),
        already_processed: live
            .iter()
            .filter(|item| ledger.processed.contains(&item.id))
            .count(),
    }
}

fn retry_targets(ledger: &Ledger) -> BTreeSet<ItemId> {
    ledger
        .failed
        .iter()
        .map(|f| f.item_id.clone())
        .chain(ledger.pending.iter().cloned())
        .collect()
}

fn orphaned(ledger: &Ledger, live: &[Item]) -> Vec<ItemId> {
    let live: BTreeSet<&ItemId> = live.iter().map(|item| &item.id).collect();
    retry_targets(ledger)
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect()
}

/// Run-level failure. Per-item failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("corrupt ledger {}: {reason}", path.display())]
    CorruptLedger { path: PathBuf, reason: String },
    #[error("no ledger found for job {0}")]
    LedgerNotFound(JobKey),
    #[error("retrying failed items requires checkpointing to be enabled")]
    CheckpointingDisabled,
    #[error("ledger store error: {0}")]
    Store(LedgerStoreError),
    #[error("ledger could not be persisted: {0}")]
    Persistence(LedgerStoreError),
}

impl From<LedgerStoreError> for RunError {
    fn from(e: LedgerStoreError) -> Self {
        match e {
            LedgerStoreError::Corrupt { path, reason } => RunError::CorruptLedger { path, reason },
            other => RunError::Store(other),
        }
    }
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_key: JobKey,
    pub run_id: RunId,
    /// `None` for one-shot runs.
    pub ledger_path: Option<PathBuf>,
    pub resumed: bool,
    pub processed: usize,
    pub failed: usize,
    pub pending: usize,
    pub orphaned: Vec<ItemId>,
    /// This run's outcomes, sorted by item path.
    pub outcomes: Vec<ItemOutcome>,
    /// Sizes of the dispatched batches. Empty in sequential mode.
    pub batches: Vec<usize>,
}

impl RunReport {
    /// No failures and nothing left to do.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.pending == 0
    }
}

/// Runs jobs over containers, resuming from the ledger store when
/// checkpointing is on.
pub struct JobRunner {
    config: BatchConfig,
    enumerator: ItemEnumerator,
    fetcher: FetchGate,
    coordinator: BatchCoordinator,
    store: Arc<dyn LedgerStore>,
}

impl JobRunner {
    pub fn new(
        lister: Arc<dyn ItemLister>,
        fetcher: Arc<dyn ItemFetcher>,
        processor: Arc<dyn ItemProcessor>,
        config: BatchConfig,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let fetcher = FetchGate::new(fetcher);
        let coordinator = BatchCoordinator::new(fetcher.clone(), processor, &config);
        let store = Arc::new(FsLedgerStore::new(config.checkpoint_dir.clone()));
        Ok(Self {
            config,
            enumerator: ItemEnumerator::new(lister),
            fetcher,
            coordinator,
            store,
        })
    }

    /// Replace the default file-system store under `checkpoint_dir`.
    pub fn with_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.coordinator = self.coordinator.with_classifier(classifier);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Start or resume the job for `container`.
    ///
    /// With checkpointing off this is a one-shot pass that touches no ledger.
    pub fn run(
        &self,
        container: &ContainerRef,
        settings: &AnalysisSettings,
    ) -> Result<RunReport, RunError> {
        let run_id = RunId::new();
        let job_key = JobKey::for_container(&container.id);
        let items = self.enumerator.enumerate(&container.id)?;

        if !self.config.checkpointing {
            info!(
                job_key = %job_key,
                run_id = %run_id,
                items = items.len(),
                "starting one-shot run"
            );
            let summary = self.coordinator.execute(&items, None);
            return Ok(one_shot_report(job_key, run_id, summary));
        }

        let (handle, ledger, resumed) = match self.open_ledger(&job_key, &container.id)? {
            Some((handle, ledger)) => (handle, ledger, true),
            None => {
                let ledger = Ledger::new(
                    job_key.clone(),
                    self.container_name(container),
                    items.len(),
                    serde_json::json!({
                        "analysis": settings.snapshot(),
                        "batch": self.config.snapshot(),
                    }),
                )
                .with_container_id(container.id.clone());
                (self.store.create_handle(&job_key), ledger, false)
            }
        };

        let plan = plan_work(&ledger, &items);
        let ledger = Arc::new(ProgressLedger::new(ledger));
        ledger.set_run_id(run_id);

        if resumed {
            let previous = ledger.set_total_items(items.len());
            if previous != items.len() {
                warn!(
                    job_key = %job_key,
                    previous,
                    current = items.len(),
                    "item count changed since last run"
                );
            }
            if ledger.reopen() {
                info!(job_key = %job_key, "reopening completed job to check for new work");
            }
            info!(
                job_key = %job_key,
                run_id = %run_id,
                path = %handle.path.display(),
                already_processed = plan.already_processed,
                remaining = plan.work.len(),
                "resuming from ledger"
            );
        } else {
            info!(
                job_key = %job_key,
                run_id = %run_id,
                path = %handle.path.display(),
                items = items.len(),
                "starting new job"
            );
        }

        // New items and anything not already failed are tracked as pending.
        let known_failed: BTreeSet<ItemId> =
            ledger.failed().into_iter().map(|f| f.item_id).collect();
        ledger.add_pending(
            plan.work
                .iter()
                .filter(|item| !known_failed.contains(&item.id))
                .map(|item| item.id.clone()),
        );

        self.execute(handle, ledger, plan, resumed, run_id)
    }

    /// Re-attempt only the failed and pending items of an existing ledger.
    ///
    /// Needs checkpointing: without it there is no ledger to retry from.
    pub fn retry_failed(&self, container: &ContainerRef) -> Result<RunReport, RunError> {
        if !self.config.checkpointing {
            return Err(RunError::CheckpointingDisabled);
        }
        let run_id = RunId::new();
        let job_key = JobKey::for_container(&container.id);
        let handle = self
            .store
            .find_existing(&job_key)?
            .ok_or_else(|| RunError::LedgerNotFound(job_key.clone()))?;
        let ledger = self
            .store
            .load(&handle)
            .and_then(|ledger| check_owner(&handle, ledger, &container.id))?;
        let items = self.enumerator.enumerate(&container.id)?;

        let plan = plan_retry(&ledger, &items);
        info!(
            job_key = %job_key,
            run_id = %run_id,
            path = %handle.path.display(),
            retrying = plan.work.len(),
            "starting retry-only run"
        );

        let ledger = Arc::new(ProgressLedger::new(ledger));
        ledger.set_run_id(run_id);
        ledger.reopen();

        self.execute(handle, ledger, plan, true, run_id)
    }

    /// Load the ledger for `job_key`, applying the corrupt-ledger policy.
    ///
    /// A ledger recorded for another container counts as corrupt.
    fn open_ledger(
        &self,
        job_key: &JobKey,
        container: &ContainerId,
    ) -> Result<Option<(LedgerHandle, Ledger)>, RunError> {
        let Some(handle) = self.store.find_existing(job_key)? else {
            return Ok(None);
        };
        let loaded = self
            .store
            .load(&handle)
            .and_then(|ledger| check_owner(&handle, ledger, container));
        match loaded {
            Ok(ledger) => Ok(Some((handle, ledger))),
            Err(LedgerStoreError::Corrupt { path, reason }) => match self
                .config
                .corrupt_ledger_policy
            {
                CorruptLedgerPolicy::Abort => Err(RunError::CorruptLedger { path, reason }),
                CorruptLedgerPolicy::StartFresh => {
                    warn!(
                        job_key = %job_key,
                        path = %path.display(),
                        reason = %reason,
                        "ledger is corrupt, starting a fresh one"
                    );
                    Ok(None)
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    fn container_name(&self, container: &ContainerRef) -> String {
        if let Some(name) = &container.name {
            return name.clone();
        }
        let looked_up = ItemId::new(container.id.as_str())
            .map_err(|e| SourceError::unavailable(e.to_string()))
            .and_then(|id| self.fetcher.info(&id));
        match looked_up {
            Ok(meta) => meta.name,
            Err(e) => {
                warn!(container_id = %container.id, error = %e, "container name lookup failed");
                UNKNOWN_CONTAINER_NAME.to_string()
            }
        }
    }

    fn execute(
        &self,
        handle: LedgerHandle,
        ledger: Arc<ProgressLedger>,
        plan: WorkPlan,
        resumed: bool,
        run_id: RunId,
    ) -> Result<RunReport, RunError> {
        let job_key = handle.job_key.clone();
        if !plan.orphaned.is_empty() {
            warn!(
                job_key = %job_key,
                count = plan.orphaned.len(),
                "items in ledger are no longer in the source and will not be retried"
            );
        }

        let checkpointer = Checkpointer::new(
            ledger.clone(),
            self.store.clone(),
            handle,
            self.config.checkpoint_flush_interval,
        );
        if let Err(e) = checkpointer.flush() {
            warn!(job_key = %job_key, error = %e, "initial ledger flush failed");
        }

        let summary = self.coordinator.execute(&plan.work, Some(&checkpointer));

        ledger.finalize();
        checkpointer
            .flush_final(self.config.final_flush_attempts, self.config.final_flush_backoff)
            .map_err(RunError::Persistence)?;

        let progress = ledger.progress();
        let path = checkpointer.handle().path.clone();
        info!(
            job_key = %job_key,
            run_id = %run_id,
            processed = progress.processed,
            failed = progress.failed,
            pending = progress.pending,
            orphaned = plan.orphaned.len(),
            path = %path.display(),
            "job finished"
        );

        Ok(RunReport {
            job_key,
            run_id,
            ledger_path: Some(path),
            resumed,
            processed: progress.processed,
            failed: progress.failed,
            pending: progress.pending,
            orphaned: plan.orphaned,
            outcomes: sorted_outcomes(summary.outcomes),
            batches: summary.batches,
        })
    }
}

fn check_owner(
    handle: &LedgerHandle,
    ledger: Ledger,
    container: &ContainerId,
) -> Result<Ledger, LedgerStoreError> {
    match &ledger.container_id {
        Some(owner) if owner != container => Err(LedgerStoreError::Corrupt {
            path: handle.path.clone(),
            reason: format!("ledger belongs to container {owner}, not {container}"),
        }),
        _ => Ok(ledger),
    }
}

fn one_shot_report(job_key: JobKey, run_id: RunId, summary: ExecutionSummary) -> RunReport {
    let processed = summary.succeeded();
    let failed = summary.failed();
    info!(job_key = %job_key, run_id = %run_id, processed, failed, "one-shot run finished");
    RunReport {
        job_key,
        run_id,
        ledger_path: None,
        resumed: false,
        processed,
        failed,
        pending: 0,
        orphaned: Vec::new(),
        outcomes: sorted_outcomes(summary.outcomes),
        batches: summary.batches,
    }
}

fn sorted_outcomes(mut outcomes: Vec<ItemOutcome>) -> Vec<ItemOutcome> {
    outcomes.sort_by(|a, b| a.item().path.cmp(&b.item().path));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use summarizer_ai::AnalysisOutput;

    fn item(n: usize) -> Item {
        Item::new(
            ItemId::new(format!("item-{n}")).unwrap(),
            format!("doc-{n}.pdf"),
            format!("docs/doc-{n}.pdf"),
        )
    }

    fn ledger() -> Ledger {
        Ledger::new(JobKey::new("job").unwrap(), "Inbox", 0, serde_json::Value::Null)
    }

    #[test]
    fn resume_skips_processed_items() {
        let live: Vec<_> = (0..10).map(item).collect();
        let mut l = ledger();
        for n in 0..4 {
            l.mark_processed(&item(n), AnalysisOutput::new("ok"));
        }

        let plan = plan_work(&l, &live);
        assert_eq!(plan.work.len(), 6);
        assert_eq!(plan.already_processed, 4);
        assert!(plan.orphaned.is_empty());
        assert!(plan.work.iter().all(|i| !l.processed.contains(&i.id)));
    }

    #[test]
    fn failed_and_pending_ids_are_retried_or_orphaned() {
        let live: Vec<_> = (0..5).map(item).collect();
        let mut l = ledger();
        l.mark_processed(&item(0), AnalysisOutput::new("ok"));
        l.mark_failed(&item(1), "boom");
        l.add_pending([item(2).id]);
        // Gone from the source since the last run.
        l.mark_failed(&item(9), "boom");
        l.add_pending([item(8).id]);

        let plan = plan_work(&l, &live);
        let ids: Vec<_> = plan.work.iter().map(|i| i.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["item-1", "item-2", "item-3", "item-4"]);
        assert_eq!(
            plan.orphaned,
            vec![ItemId::new("item-8").unwrap(), ItemId::new("item-9").unwrap()]
        );
    }

    #[test]
    fn retry_plan_targets_only_failed_and_pending() {
        let live: Vec<_> = (0..5).map(item).collect();
        let mut l = ledger();
        l.mark_processed(&item(0), AnalysisOutput::new("ok"));
        l.mark_failed(&item(3), "boom");
        l.add_pending([item(4).id]);

        let plan = plan_retry(&l, &live);
        let ids: Vec<_> = plan.work.iter().map(|i| i.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["item-3", "item-4"]);
        assert_eq!(plan.already_processed, 1);
    }

    #[test]
    fn corrupt_store_error_maps_to_corrupt_ledger() {
        let err: RunError = LedgerStoreError::Corrupt {
            path: PathBuf::from("/tmp/x.json"),
            reason: "eof".to_string(),
        }
        .into();
        assert!(matches!(err, RunError::CorruptLedger { .. }));
    }
}
