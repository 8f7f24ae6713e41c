//! `summarizer-ai`
//!
//! **Responsibility:** the analysis boundary of the batch engine.
//!
//! - `ItemProcessor` is the single extension point for "analyse one item".
//! - `RetryClassifier` turns a processor result into success or failure,
//!   including error payloads returned with a successful transport status.
//! - `AnalysisSettings` is the run configuration recorded for audit.
//!
//! Prompt construction, model selection and response repair live behind
//! `ItemProcessor` implementations, not here.

pub mod classifier;
pub mod processor;
pub mod result;
pub mod settings;

pub use classifier::{Classification, DEFAULT_FAILURE_INDICATORS, RetryClassifier};
pub use processor::ItemProcessor;
pub use result::{AnalysisOutput, ChildAnalysis, ProcessError};
pub use settings::AnalysisSettings;
