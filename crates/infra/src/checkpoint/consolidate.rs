//! Flattening of a ledger's result history into one deduplicated listing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use summarizer_core::ItemId;

use super::types::ResultRecord;

/// One document description in an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedEntry {
    pub item_id: ItemId,
    /// Set for documents found inside another item, such as an archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    pub name: String,
    pub path: String,
    pub description: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consolidated {
    pub consolidated_at: DateTime<Utc>,
    pub total_documents: usize,
    pub duplicates_removed: usize,
    pub descriptions: Vec<ConsolidatedEntry>,
}

/// Deduplicate result records by item, keeping the latest `processed_at`,
/// then flatten nested child analyses and sort by path.
pub fn consolidate(records: &[ResultRecord]) -> Consolidated {
    let mut latest: BTreeMap<&ItemId, &ResultRecord> = BTreeMap::new();
    for record in records {
        latest
            .entry(&record.item_id)
            .and_modify(|kept| {
                if record.processed_at >= kept.processed_at {
                    *kept = record;
                }
            })
            .or_insert(record);
    }
    let duplicates_removed = records.len() - latest.len();

    let mut descriptions = Vec::new();
    for record in latest.into_values() {
        let path = if record.item_path.is_empty() {
            record.item_name.clone()
        } else {
            record.item_path.clone()
        };
        descriptions.push(ConsolidatedEntry {
            item_id: record.item_id.clone(),
            parent_name: None,
            name: record.item_name.clone(),
            path: path.clone(),
            description: record.result.description.clone(),
            processed_at: record.processed_at,
        });
        for child in &record.result.children {
            descriptions.push(ConsolidatedEntry {
                item_id: record.item_id.clone(),
                parent_name: Some(record.item_name.clone()),
                name: child.name.clone(),
                path: format!("{path}/{}", child.path),
                description: child.description.clone(),
                processed_at: record.processed_at,
            });
        }
    }
    descriptions.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.name.cmp(&b.name)));

    Consolidated {
        consolidated_at: Utc::now(),
        total_documents: descriptions.len(),
        duplicates_removed,
        descriptions,
    }
}
