use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use summarizer_core::{ContainerId, Item};

use super::{ItemLister, SourceError};

/// All-or-nothing listing of a container.
#[derive(Clone)]
pub struct ItemEnumerator {
    lister: Arc<dyn ItemLister>,
}

impl ItemEnumerator {
    pub fn new(lister: Arc<dyn ItemLister>) -> Self {
        Self { lister }
    }

    /// List every item of `container`.
    ///
    /// Any lister error fails the whole call; no partial listing is returned.
    /// Duplicate ids keep their first occurrence.
    pub fn enumerate(&self, container: &ContainerId) -> Result<Vec<Item>, SourceError> {
        let listed = self.lister.list(container).map_err(|e| match e {
            SourceError::Unavailable(_) => e,
            other => SourceError::unavailable(other.to_string()),
        })?;

        let mut seen = HashSet::with_capacity(listed.len());
        let mut items = Vec::with_capacity(listed.len());
        for item in listed {
            if seen.insert(item.id.clone()) {
                items.push(item);
            } else {
                warn!(
                    container_id = %container,
                    item_id = %item.id,
                    "duplicate item id in listing, keeping first occurrence"
                );
            }
        }

        info!(container_id = %container, count = items.len(), "enumerated items");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use summarizer_core::ItemId;

    fn item(id: &str) -> Item {
        Item::new(ItemId::new(id).unwrap(), format!("{id}.pdf"), format!("{id}.pdf"))
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let lister = |_: &ContainerId| -> Result<Vec<Item>, SourceError> {
            let mut second = item("a");
            second.name = "second.pdf".to_string();
            Ok(vec![item("a"), item("b"), second])
        };
        let enumerator = ItemEnumerator::new(Arc::new(FnLister(lister)));
        let items = enumerator
            .enumerate(&ContainerId::new("c").unwrap())
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "a.pdf");
    }

    #[test]
    fn lister_errors_become_unavailable() {
        let lister = |_: &ContainerId| -> Result<Vec<Item>, SourceError> {
            Err(SourceError::NotFound("c".to_string()))
        };
        let enumerator = ItemEnumerator::new(Arc::new(FnLister(lister)));
        let err = enumerator
            .enumerate(&ContainerId::new("c").unwrap())
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    struct FnLister<F>(F);

    impl<F> ItemLister for FnLister<F>
    where
        F: Fn(&ContainerId) -> Result<Vec<Item>, SourceError> + Send + Sync,
    {
        fn list(&self, container: &ContainerId) -> Result<Vec<Item>, SourceError> {
            (self.0)(container)
        }
    }
}
