//! Batch engine: execution, checkpointing, and resume/retry control.
//!
//! ## Components
//!
//! - `BatchCoordinator`: runs a work set sequentially or in bounded batches
//! - `Checkpointer`: flushes the run's ledger on an interval and at job end
//! - `JobRunner`: fresh, resumed, one-shot and retry-only runs

mod checkpointer;
mod coordinator;
mod resume;

pub use checkpointer::Checkpointer;
pub use coordinator::{BatchCoordinator, ExecutionSummary, ItemOutcome};
pub use resume::{
    plan_retry, plan_work, JobRunner, RunError, RunReport, WorkPlan, UNKNOWN_CONTAINER_NAME,
};
