//! Sequential and batch-parallel execution of a work set.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use summarizer_ai::{AnalysisOutput, Classification, ItemProcessor, ProcessError, RetryClassifier};
use summarizer_core::Item;

use super::checkpointer::Checkpointer;
use crate::config::BatchConfig;
use crate::source::FetchGate;

/// Result of processing one item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success {
        item: Item,
        result: AnalysisOutput,
    },
    Failure {
        item: Item,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl ItemOutcome {
    pub fn item(&self) -> &Item {
        match self {
            ItemOutcome::Success { item, .. } | ItemOutcome::Failure { item, .. } => item,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }
}

/// What one `execute` call did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// In completion order.
    pub outcomes: Vec<ItemOutcome>,
    /// Sizes of the dispatched batches. Empty in sequential mode.
    pub batches: Vec<usize>,
}

impl ExecutionSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Drives items through fetch, analysis and classification.
///
/// Per-item errors, including panics inside the processor, become
/// [`ItemOutcome::Failure`] values and never abort the run.
pub struct BatchCoordinator {
    fetcher: FetchGate,
    processor: Arc<dyn ItemProcessor>,
    classifier: RetryClassifier,
    batch_size: usize,
    max_workers: usize,
    progress_log_every: usize,
}

impl BatchCoordinator {
    pub fn new(
        fetcher: FetchGate,
        processor: Arc<dyn ItemProcessor>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            fetcher,
            processor,
            classifier: RetryClassifier::default(),
            batch_size: config.batch_size.max(1),
            max_workers: config.max_workers.max(1),
            progress_log_every: config.progress_log_every.max(1),
        }
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn is_sequential(&self) -> bool {
        self.batch_size <= 1 || self.max_workers <= 1
    }

    /// Process every item in `items`.
    ///
    /// With a checkpointer, each outcome is recorded in its ledger as soon as
    /// the item finishes, and the ledger is flushed on the checkpoint interval.
    pub fn execute(
        &self,
        items: &[Item],
        checkpointer: Option<&Checkpointer>,
    ) -> ExecutionSummary {
        if self.is_sequential() {
            self.execute_sequential(items, checkpointer)
        } else {
            self.execute_batched(items, checkpointer)
        }
    }

    fn execute_sequential(
        &self,
        items: &[Item],
        checkpointer: Option<&Checkpointer>,
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        for (n, item) in items.iter().enumerate() {
            let outcome = self.process_one(item);
            self.record(&outcome, checkpointer);
            summary.outcomes.push(outcome);

            let done = n + 1;
            if done % self.progress_log_every == 0 || done == items.len() {
                info!(
                    done,
                    total = items.len(),
                    succeeded = summary.succeeded(),
                    failed = summary.failed(),
                    "progress"
                );
            }
            if let Some(cp) = checkpointer {
                cp.flush_if_due();
            }
        }
        summary
    }

    fn execute_batched(
        &self,
        items: &[Item],
        checkpointer: Option<&Checkpointer>,
    ) -> ExecutionSummary {
        let total_batches = items.len().div_ceil(self.batch_size);
        let outcomes = Mutex::new(Vec::with_capacity(items.len()));
        let mut batches = Vec::with_capacity(total_batches);

        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            batches.push(batch.len());
            let workers = self.max_workers.min(batch.len());
            debug!(batch = index + 1, size = batch.len(), workers, "dispatching batch");

            let cursor = AtomicUsize::new(0);
            // Scope exit is the barrier: the next batch starts only after
            // every worker of this one has returned.
            thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(|| {
                        while let Some(item) = batch.get(cursor.fetch_add(1, Ordering::SeqCst)) {
                            let outcome = self.process_one(item);
                            self.record(&outcome, checkpointer);
                            outcomes
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(outcome);
                        }
                    });
                }
            });

            let done = outcomes.lock().unwrap_or_else(PoisonError::into_inner).len();
            match checkpointer {
                Some(cp) => {
                    let p = cp.ledger().progress();
                    info!(
                        batch = index + 1,
                        batches = total_batches,
                        done,
                        processed = p.processed,
                        failed = p.failed,
                        pending = p.pending,
                        percent = p.percent,
                        "batch complete"
                    );
                    cp.flush_if_due();
                }
                None => info!(
                    batch = index + 1,
                    batches = total_batches,
                    done,
                    total = items.len(),
                    "batch complete"
                ),
            }
        }

        ExecutionSummary {
            outcomes: outcomes.into_inner().unwrap_or_else(PoisonError::into_inner),
            batches,
        }
    }

    /// Fetch, analyse and classify one item. Never panics, never errors.
    pub fn process_one(&self, item: &Item) -> ItemOutcome {
        let content = match self.fetcher.fetch(&item.id) {
            Ok(bytes) => bytes,
            Err(e) => return failure(item, format!("fetch failed: {e}")),
        };

        let called =
            panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(item, &content)));
        let result = called.unwrap_or_else(|payload| {
            Err(ProcessError::internal(format!(
                "processor panicked: {}",
                panic_message(&*payload)
            )))
        });

        match self.classifier.classify(result) {
            Classification::Success(result) => ItemOutcome::Success {
                item: item.clone(),
                result,
            },
            Classification::Failure(reason) => failure(item, reason),
        }
    }

    fn record(&self, outcome: &ItemOutcome, checkpointer: Option<&Checkpointer>) {
        match outcome {
            ItemOutcome::Success { item, result } => {
                debug!(item_id = %item.id, path = %item.path, "item processed");
                if let Some(cp) = checkpointer {
                    cp.ledger().mark_processed(item, result.clone());
                }
            }
            ItemOutcome::Failure { item, error, .. } => {
                warn!(item_id = %item.id, path = %item.path, error = %error, "item failed");
                if let Some(cp) = checkpointer {
                    cp.ledger().mark_failed(item, error.clone());
                }
            }
        }
    }
}

fn failure(item: &Item, error: String) -> ItemOutcome {
    ItemOutcome::Failure {
        item: item.clone(),
        error,
        failed_at: Utc::now(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
