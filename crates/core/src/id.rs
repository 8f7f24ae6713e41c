//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Identifier of one unit of work, unique within a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

/// Identifier of a source container (e.g. a remote folder).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

/// Identifier of one resumable run over one container.
///
/// Job keys end up in ledger file names, so they only contain ASCII
/// alphanumerics, `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobKey(String);

/// Identifier of a single execution (fresh, resumed or retry-only) of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

macro_rules! impl_string_newtype {
    ($t:ty) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

impl_string_newtype!(ItemId);
impl_string_newtype!(ContainerId);
impl_string_newtype!(JobKey);

impl ItemId {
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CoreError::invalid_id("ItemId: must not be empty"));
        }
        Ok(Self(value))
    }
}

impl ContainerId {
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CoreError::invalid_id("ContainerId: must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Accepts either a bare container id or a folder URL such as
    /// `https://drive.google.com/drive/u/0/folders/<ID>?usp=sharing`.
    ///
    /// Only inputs with a URL scheme are searched for a folder segment, so
    /// local paths containing `folders/` are kept whole.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let input = input.trim();
        if !has_url_scheme(input) {
            return Self::new(input);
        }
        match input.rsplit_once("/folders/") {
            Some((_, tail)) => {
                let id = tail.split(['?', '/', '#']).next().unwrap_or_default();
                Self::new(id)
            }
            None => Self::new(input),
        }
    }
}

fn has_url_scheme(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

impl JobKey {
    pub fn new(value: impl Into<String>) -> CoreResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(CoreError::invalid_id("JobKey: must not be empty"));
        }
        if let Some(bad) = value.chars().find(|c| !is_key_char(*c)) {
            return Err(CoreError::invalid_id(format!(
                "JobKey: unsupported character {bad:?} in {value:?}"
            )));
        }
        Ok(Self(value))
    }

    /// Derive the job key for a container.
    ///
    /// Ids that are already file-name safe are used as they are. Anything
    /// else (local folder paths, mostly) is sanitized and suffixed with a
    /// short hash of the raw id, so `/data/a b` and `/data/a_b` get distinct
    /// keys.
    pub fn for_container(container: &ContainerId) -> Self {
        let raw = container.as_str();
        if raw.chars().all(is_key_char) {
            return Self(raw.to_string());
        }

        let sanitized: String = raw
            .chars()
            .map(|c| if is_key_char(c) { c } else { '_' })
            .collect();
        let prefix = match sanitized.trim_matches('_') {
            "" => "container",
            trimmed => trimmed,
        };
        let digest = blake3::hash(raw.as_bytes()).to_hex();
        Self(format!("{prefix}-{}", &digest[..KEY_HASH_LEN]))
    }
}

/// Hex digits of the raw-id hash appended to sanitized keys.
const KEY_HASH_LEN: usize = 12;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl RunId {
    /// Uses UUIDv7, so run ids sort by start time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for RunId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn container_id_is_extracted_from_folder_url() {
        let id = ContainerId::parse(
            "https://drive.google.com/drive/u/0/folders/16JqSg7BuAE_o1wkFM4q4QUWXMgLRcjFh?usp=sharing",
        )
        .unwrap();
        assert_eq!(id.as_str(), "16JqSg7BuAE_o1wkFM4q4QUWXMgLRcjFh");

        let id = ContainerId::parse("https://drive.google.com/drive/folders/abc123/").unwrap();
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn bare_container_id_is_kept() {
        let id = ContainerId::parse("  16JqSg7BuAE  ").unwrap();
        assert_eq!(id.as_str(), "16JqSg7BuAE");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(ContainerId::parse("").is_err());
        assert!(ContainerId::parse("https://drive.google.com/drive/folders/?x=1").is_err());
        assert!(ItemId::new("   ").is_err());
        assert!(JobKey::new("").is_err());
    }

    #[test]
    fn job_key_rejects_path_characters() {
        assert!(JobKey::new("abc/def").is_err());
        assert!(JobKey::new("abc def").is_err());
        assert!(JobKey::new("abc-DEF_1.2").is_ok());
    }

    #[test]
    fn job_key_for_local_path_is_sanitized() {
        let container = ContainerId::new("/data/inbox/2024 Q1").unwrap();
        let key = JobKey::for_container(&container);
        let (prefix, digest) = key.as_str().rsplit_once('-').unwrap();
        assert_eq!(prefix, "data_inbox_2024_Q1");
        assert_eq!(digest.len(), KEY_HASH_LEN);
        assert_eq!(key, JobKey::for_container(&container));
    }

    #[test]
    fn file_safe_container_ids_are_their_own_key() {
        let container = ContainerId::new("16JqSg7BuAE_o1wkFM4q4QUWXMgLRcjFh").unwrap();
        assert_eq!(JobKey::for_container(&container).as_str(), container.as_str());
    }

    #[test]
    fn paths_differing_only_in_unsafe_characters_get_distinct_keys() {
        let keys: BTreeSet<JobKey> = ["/data/a b", "/data/a_b", "/data/a/b", "data_a_b"]
            .into_iter()
            .map(|raw| JobKey::for_container(&ContainerId::new(raw).unwrap()))
            .collect();
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn local_paths_with_folders_segment_are_not_urls() {
        let id = ContainerId::parse("/data/folders/inbox").unwrap();
        assert_eq!(id.as_str(), "/data/folders/inbox");
        let key = JobKey::for_container(&id);
        assert!(key.as_str().starts_with("data_folders_inbox-"), "{key}");

        let id = ContainerId::parse("http://example.com/drive/folders/xyz?a=b").unwrap();
        assert_eq!(id.as_str(), "xyz");
    }

    #[test]
    fn job_key_round_trips_through_json() {
        let key = JobKey::new("folder-1").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"folder-1\"");
        let back: JobKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<JobKey>("\"bad/key\"").is_err());
    }

    proptest! {
        #[test]
        fn derived_job_keys_are_always_valid(raw in "\\PC{1,40}") {
            if let Ok(container) = ContainerId::new(raw) {
                let key = JobKey::for_container(&container);
                prop_assert!(JobKey::new(key.as_str()).is_ok());
            }
        }

        #[test]
        fn distinct_containers_get_distinct_keys(a in "[a-c /_]{1,8}", b in "[a-c /_]{1,8}") {
            let (a, b) = match (ContainerId::new(a), ContainerId::new(b)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return Ok(()),
            };
            if a != b {
                prop_assert_ne!(JobKey::for_container(&a), JobKey::for_container(&b));
            }
        }
    }
}
