//! `summarizer-core`: identifiers and work-item primitives.
//!
//! This crate has no I/O. Sources, ledgers and the batch engine live in
//! `summarizer-infra`; the analysis boundary lives in `summarizer-ai`.

pub mod error;
pub mod id;
pub mod item;

pub use error::{CoreError, CoreResult};
pub use id::{ContainerId, ItemId, JobKey, RunId};
pub use item::{ContainerRef, Item, ItemMetadata};
