//! Item sources: listing and fetching the documents of a container.
//!
//! Concrete transports implement [`ItemLister`] and [`ItemFetcher`]. A fetcher
//! that cannot be called concurrently declares
//! [`FetchConcurrency::Serialized`] and the engine wraps it in a
//! [`FetchGate`].

mod enumerator;
mod gate;
mod local;

pub use enumerator::ItemEnumerator;
pub use gate::FetchGate;
pub use local::LocalFolderSource;

use summarizer_core::{ContainerId, Item, ItemId, ItemMetadata};

/// Lists the items of a container.
pub trait ItemLister: Send + Sync {
    fn list(&self, container: &ContainerId) -> Result<Vec<Item>, SourceError>;
}

/// Whether an [`ItemFetcher`] may be called from several threads at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchConcurrency {
    #[default]
    Parallel,
    Serialized,
}

/// Retrieves item content and metadata.
pub trait ItemFetcher: Send + Sync {
    fn fetch(&self, id: &ItemId) -> Result<Vec<u8>, SourceError>;

    /// Metadata for an item, or for a container when given a container id.
    fn info(&self, id: &ItemId) -> Result<ItemMetadata, SourceError>;

    fn concurrency(&self) -> FetchConcurrency {
        FetchConcurrency::Parallel
    }
}

/// Source error.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
