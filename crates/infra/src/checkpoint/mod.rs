//! Durable job progress: the ledger, its concurrent wrapper, and storage.

mod consolidate;
mod ledger;
mod status;
mod store;
mod types;

pub use consolidate::{consolidate, Consolidated, ConsolidatedEntry};
pub use ledger::ProgressLedger;
pub use status::LedgerStatusReport;
pub use store::{FsLedgerStore, InMemoryLedgerStore, LedgerHandle, LedgerStore, LedgerStoreError};
pub use types::{FailedItem, Ledger, LedgerStatus, Progress, ResultRecord};
