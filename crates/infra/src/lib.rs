//! Infrastructure layer: item sources, checkpoint ledgers, and the batch engine.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod source;


pub use batch::{BatchCoordinator, JobRunner, RunError, RunReport};
pub use checkpoint::{FsLedgerStore, Ledger, LedgerStore, ProgressLedger};
pub use config::{BatchConfig, ConfigError, CorruptLedgerPolicy};
pub use source::{ItemFetcher, ItemLister, LocalFolderSource, SourceError};
