use std::sync::{Arc, Mutex, PoisonError};

use summarizer_core::{ItemId, ItemMetadata};

use super::{FetchConcurrency, ItemFetcher, SourceError};

/// Fetcher wrapper honouring the fetcher's declared concurrency.
///
/// Serialized fetchers are called under one shared mutex, so at most one
/// `fetch` or `info` call is in flight even in batch-parallel mode.
#[derive(Clone)]
pub struct FetchGate {
    fetcher: Arc<dyn ItemFetcher>,
    lock: Option<Arc<Mutex<()>>>,
}

impl FetchGate {
    pub fn new(fetcher: Arc<dyn ItemFetcher>) -> Self {
        let lock = match fetcher.concurrency() {
            FetchConcurrency::Parallel => None,
            FetchConcurrency::Serialized => Some(Arc::new(Mutex::new(()))),
        };
        Self { fetcher, lock }
    }

    pub fn is_serialized(&self) -> bool {
        self.lock.is_some()
    }

    fn gated<T>(&self, call: impl FnOnce(&dyn ItemFetcher) -> T) -> T {
        match &self.lock {
            Some(lock) => {
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                call(self.fetcher.as_ref())
            }
            None => call(self.fetcher.as_ref()),
        }
    }

    pub fn fetch(&self, id: &ItemId) -> Result<Vec<u8>, SourceError> {
        self.gated(|f| f.fetch(id))
    }

    pub fn info(&self, id: &ItemId) -> Result<ItemMetadata, SourceError> {
        self.gated(|f| f.info(id))
    }
}
