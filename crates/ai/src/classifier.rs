//! Success/failure classification of analysis results.
//!
//! The analysis service can answer a request successfully at the transport
//! level while embedding an error message in the content ("Error: no content
//! returned"). Those payloads must land in the ledger's failed list, so every
//! successful response is also checked against a list of failure indicators.

use crate::result::{AnalysisOutput, ProcessError};

/// Substrings that mark a payload as a failed analysis (matched
/// case-insensitively).
pub const DEFAULT_FAILURE_INDICATORS: &[&str] =
    &["error:", "no content returned", "failed", "error calling"];

/// Verdict for one processed item.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success(AnalysisOutput),
    Failure(String),
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryClassifier {
    /// Stored lowercased.
    indicators: Vec<String>,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::with_indicators(DEFAULT_FAILURE_INDICATORS.iter().copied())
    }
}

impl RetryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the indicator list. Empty indicators are ignored.
    pub fn with_indicators<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let indicators = indicators
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { indicators }
    }

    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }

    pub fn classify(&self, result: Result<AnalysisOutput, ProcessError>) -> Classification {
        match result {
            Err(err) => Classification::Failure(err.to_string()),
            Ok(output) => match self.failure_reason(&output.description) {
                Some(reason) => Classification::Failure(reason),
                None => Classification::Success(output),
            },
        }
    }

    /// Returns the payload text when it matches a failure indicator.
    pub fn failure_reason(&self, payload: &str) -> Option<String> {
        let lowered = payload.to_lowercase();
        self.indicators
            .iter()
            .any(|needle| lowered.contains(needle.as_str()))
            .then(|| payload.to_string())
    }
}
