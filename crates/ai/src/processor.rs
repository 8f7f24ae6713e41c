use summarizer_core::Item;

use crate::result::{AnalysisOutput, ProcessError};

/// Runs the analysis pipeline on one fetched item.
///
/// Implementations own prompt construction, model selection and response
/// repair. The batch engine only sees success, error, and the returned text.
///
/// Processors are called from several worker threads at once in
/// batch-parallel mode, hence `Send + Sync`.
pub trait ItemProcessor: Send + Sync {
    fn process(&self, item: &Item, content: &[u8]) -> Result<AnalysisOutput, ProcessError>;
}

impl<F> ItemProcessor for F
where
    F: Fn(&Item, &[u8]) -> Result<AnalysisOutput, ProcessError> + Send + Sync,
{
    fn process(&self, item: &Item, content: &[u8]) -> Result<AnalysisOutput, ProcessError> {
        self(item, content)
    }
}
