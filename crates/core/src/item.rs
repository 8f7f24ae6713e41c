//! Work items and the containers they are enumerated from.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::id::{ContainerId, ItemId};

/// One document to be analysed.
///
/// Items are immutable once enumerated within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Display location relative to the container root (`a/b/report.pdf`).
    pub path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Source-specific attributes, carried through untouched.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub source_metadata: JsonMap<String, JsonValue>,
}

impl Item {
    pub fn new(id: ItemId, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            size: 0,
            media_type: None,
            source_metadata: JsonMap::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_source_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.source_metadata.insert(key.into(), value);
        self
    }
}

/// Metadata for a single remote object (item or container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A container to process, with an optional human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: ContainerId,
    pub name: Option<String>,
}

impl ContainerRef {
    pub fn new(id: ContainerId) -> Self {
        Self { id, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
