use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Output of one analysis call.
///
/// The engine treats this as opaque apart from `description`, which the
/// retry classifier inspects for error payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Plain-text summary produced by the model.
    pub description: String,

    /// Free-form metadata (pages processed, language, model name, timings).
    #[serde(default)]
    pub metadata: JsonValue,

    /// Per-document outputs for containers such as archives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildAnalysis>,
}

impl AnalysisOutput {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            metadata: JsonValue::Null,
            children: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_child(mut self, child: ChildAnalysis) -> Self {
        self.children.push(child);
        self
    }
}

/// Analysis of one document nested inside an item (e.g. a PDF inside a ZIP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAnalysis {
    pub name: String,
    /// Location inside the parent item.
    pub path: String,
    pub description: String,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Transport-level failure of one analysis call.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("unsupported item: {0}")]
    Unsupported(String),

    #[error("analysis request failed: {0}")]
    Request(String),

    #[error("analysis timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessError {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
