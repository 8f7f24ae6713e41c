//! Ledger storage implementations.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use summarizer_core::JobKey;

use super::types::Ledger;

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".json";

/// Address of one persisted ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerHandle {
    pub job_key: JobKey,
    pub path: PathBuf,
}

impl LedgerHandle {
    pub fn new(job_key: JobKey, path: impl Into<PathBuf>) -> Self {
        Self {
            job_key,
            path: path.into(),
        }
    }
}

/// Ledger store abstraction.
pub trait LedgerStore: Send + Sync {
    /// Locate the ledger for a job key.
    /// When several artifacts match, the most recently modified one wins.
    fn find_existing(&self, job_key: &JobKey) -> Result<Option<LedgerHandle>, LedgerStoreError>;

    /// Allocate a handle for a brand new ledger. Nothing is written yet.
    fn create_handle(&self, job_key: &JobKey) -> LedgerHandle;

    /// Read a ledger back. Malformed content is [`LedgerStoreError::Corrupt`].
    fn load(&self, handle: &LedgerHandle) -> Result<Ledger, LedgerStoreError>;

    /// Persist the full ledger, stamping `last_updated`.
    /// Readers never observe a partially written ledger.
    fn save(&self, handle: &LedgerHandle, ledger: &mut Ledger) -> Result<(), LedgerStoreError>;

    /// All ledgers known to the store, ordered by job key.
    fn list(&self) -> Result<Vec<LedgerHandle>, LedgerStoreError>;
}

/// Ledger store error.
#[derive(Debug, thiserror::Error)]
pub enum LedgerStoreError {
    #[error("ledger i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt ledger {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// File-system ledger store.
///
/// One pretty-printed JSON file per job, named
/// `checkpoint_{job_key}_{unix_seconds}.json`.
#[derive(Debug, Clone)]
pub struct FsLedgerStore {
    dir: PathBuf,
}

impl FsLedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(job_key: &JobKey, unix_seconds: i64) -> String {
        format!("{FILE_PREFIX}{job_key}_{unix_seconds}{FILE_SUFFIX}")
    }

    /// Split `checkpoint_{key}_{digits}.json` into key and timestamp.
    fn parse_file_name(name: &str) -> Option<(&str, &str)> {
        let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        let (key, stamp) = stem.rsplit_once('_')?;
        if key.is_empty() || stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((key, stamp))
    }

    /// Ledger files in the directory, with their modification times.
    /// A missing directory is an empty store.
    fn scan(&self) -> Result<Vec<(LedgerHandle, SystemTime)>, LedgerStoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerStoreError::io(&self.dir, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LedgerStoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((key, _)) = Self::parse_file_name(name) else {
                continue;
            };
            let Ok(job_key) = JobKey::new(key) else { continue };

            let path = entry.path();
            let meta = entry
                .metadata()
                .map_err(|e| LedgerStoreError::io(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(|e| LedgerStoreError::io(&path, e))?;
            found.push((LedgerHandle::new(job_key, path), modified));
        }
        Ok(found)
    }
}

impl LedgerStore for FsLedgerStore {
    fn find_existing(&self, job_key: &JobKey) -> Result<Option<LedgerHandle>, LedgerStoreError> {
        let mut matches: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(|(handle, _)| &handle.job_key == job_key)
            .collect();

        // Newest first; equal mtimes fall back to the (timestamped) file name.
        matches.sort_by(|(a, ta), (b, tb)| tb.cmp(ta).then_with(|| b.path.cmp(&a.path)));

        if matches.len() > 1 {
            warn!(
                job_key = %job_key,
                count = matches.len(),
                chosen = %matches[0].0.path.display(),
                "multiple ledgers found for job key, using the most recent"
            );
        }
        Ok(matches.into_iter().next().map(|(handle, _)| handle))
    }

    fn create_handle(&self, job_key: &JobKey) -> LedgerHandle {
        let path = self
            .dir
            .join(Self::file_name(job_key, Utc::now().timestamp()));
        LedgerHandle::new(job_key.clone(), path)
    }

    fn load(&self, handle: &LedgerHandle) -> Result<Ledger, LedgerStoreError> {
        let raw = fs::read_to_string(&handle.path)
            .map_err(|e| LedgerStoreError::io(&handle.path, e))?;
        let ledger: Ledger =
            serde_json::from_str(&raw).map_err(|e| LedgerStoreError::Corrupt {
                path: handle.path.clone(),
                reason: e.to_string(),
            })?;
        if ledger.job_key != handle.job_key {
            return Err(LedgerStoreError::Corrupt {
                path: handle.path.clone(),
                reason: format!(
                    "ledger belongs to job {}, expected {}",
                    ledger.job_key, handle.job_key
                ),
            });
        }
        Ok(ledger)
    }

    fn save(&self, handle: &LedgerHandle, ledger: &mut Ledger) -> Result<(), LedgerStoreError> {
        let dir = handle.path.parent().unwrap_or(self.dir.as_path());
        fs::create_dir_all(dir).map_err(|e| LedgerStoreError::io(dir, e))?;

        ledger.touch();
        let bytes = serde_json::to_vec_pretty(ledger)?;

        // Same directory as the target so the rename stays on one file system.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LedgerStoreError::io(dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| LedgerStoreError::io(tmp.path(), e))?;
        tmp.persist(&handle.path)
            .map_err(|e| LedgerStoreError::io(&handle.path, e.error))?;

        debug!(
            job_key = %handle.job_key,
            path = %handle.path.display(),
            bytes = bytes.len(),
            "ledger saved"
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<LedgerHandle>, LedgerStoreError> {
        let mut handles: Vec<_> = self.scan()?.into_iter().map(|(h, _)| h).collect();
        handles.sort();
        Ok(handles)
    }
}

#[derive(Debug)]
struct StoredLedger {
    ledger: Ledger,
    // Monotonic write sequence, standing in for a modification time.
    seq: u64,
}

/// In-memory ledger store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    ledgers: RwLock<BTreeMap<LedgerHandle, StoredLedger>>,
    seq: AtomicU64,
    fail_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `save` fail with a storage error.
    pub fn fail_next_saves(&self, n: usize) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, handle: &LedgerHandle) -> Option<Ledger> {
        let ledgers = self.ledgers.read().unwrap();
        ledgers.get(handle).map(|s| s.ledger.clone())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn find_existing(&self, job_key: &JobKey) -> Result<Option<LedgerHandle>, LedgerStoreError> {
        let ledgers = self.ledgers.read().unwrap();
        Ok(ledgers
            .iter()
            .filter(|(h, _)| &h.job_key == job_key)
            .max_by_key(|(_, s)| s.seq)
            .map(|(h, _)| h.clone()))
    }

    fn create_handle(&self, job_key: &JobKey) -> LedgerHandle {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        LedgerHandle::new(
            job_key.clone(),
            format!("memory/{FILE_PREFIX}{job_key}_{n}{FILE_SUFFIX}"),
        )
    }

    fn load(&self, handle: &LedgerHandle) -> Result<Ledger, LedgerStoreError> {
        self.get(handle)
            .ok_or_else(|| {
                LedgerStoreError::Storage(format!("no ledger at {}", handle.path.display()))
            })
    }

    fn save(&self, handle: &LedgerHandle, ledger: &mut Ledger) -> Result<(), LedgerStoreError> {
        let injected = self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerStoreError::Storage("injected save failure".to_string()));
        }

        ledger.touch();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut ledgers = self.ledgers.write().unwrap();
        ledgers.insert(
            handle.clone(),
            StoredLedger {
                ledger: ledger.clone(),
                seq,
            },
        );
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> Result<Vec<LedgerHandle>, LedgerStoreError> {
        let ledgers = self.ledgers.read().unwrap();
        Ok(ledgers.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;
    use std::time::Duration;

    fn key(s: &str) -> JobKey {
        JobKey::new(s).unwrap()
    }

    fn ledger(k: &str) -> Ledger {
        Ledger::new(key(k), "Inbox", 3, JsonValue::Null)
    }

    #[test]
    fn file_name_parsing_requires_digit_timestamp() {
        assert_eq!(
            FsLedgerStore::parse_file_name("checkpoint_abc_1700000000.json"),
            Some(("abc", "1700000000"))
        );
        assert_eq!(
            FsLedgerStore::parse_file_name("checkpoint_a_b_12.json"),
            Some(("a_b", "12"))
        );
        assert_eq!(FsLedgerStore::parse_file_name("checkpoint_abc_12x.json"), None);
        assert_eq!(FsLedgerStore::parse_file_name("checkpoint_abc.json"), None);
        assert_eq!(FsLedgerStore::parse_file_name("other_abc_12.json"), None);
    }

    #[test]
    fn missing_directory_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path().join("nope"));
        assert!(store.find_existing(&key("abc")).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_and_stamps_last_updated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());
        let mut l = ledger("abc");
        let before = l.last_updated;

        let handle = store.create_handle(&key("abc"));
        store.save(&handle, &mut l).unwrap();
        assert!(l.last_updated >= before);

        let found = store.find_existing(&key("abc")).unwrap().unwrap();
        assert_eq!(found.path, handle.path);
        assert_eq!(store.load(&found).unwrap(), l);

        // No temp files left behind.
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn key_prefix_does_not_match_longer_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());
        let mut other = ledger("abc_def");
        let handle = store.create_handle(&key("abc_def"));
        store.save(&handle, &mut other).unwrap();

        assert!(store.find_existing(&key("abc")).unwrap().is_none());
        assert!(store.find_existing(&key("abc_def")).unwrap().is_some());
    }

    #[test]
    fn most_recently_modified_ledger_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());

        let old = LedgerHandle::new(key("abc"), dir.path().join("checkpoint_abc_2000000000.json"));
        let new = LedgerHandle::new(key("abc"), dir.path().join("checkpoint_abc_1000000000.json"));
        store.save(&old, &mut ledger("abc")).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let mut newer = ledger("abc");
        newer.container_name = "Newer".to_string();
        store.save(&new, &mut newer).unwrap();

        let found = store.find_existing(&key("abc")).unwrap().unwrap();
        assert_eq!(store.load(&found).unwrap().container_name, "Newer");
    }

    #[test]
    fn malformed_ledger_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());
        let path = dir.path().join("checkpoint_abc_1700000000.json");
        fs::write(&path, "{ not json").unwrap();

        let handle = store.find_existing(&key("abc")).unwrap().unwrap();
        let err = store.load(&handle).unwrap_err();
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn ledger_for_another_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());
        let path = dir.path().join("checkpoint_abc_1700000000.json");
        fs::write(&path, serde_json::to_vec(&ledger("xyz")).unwrap()).unwrap();

        let handle = store.find_existing(&key("abc")).unwrap().unwrap();
        assert!(store.load(&handle).unwrap_err().is_corrupt());
    }

    #[test]
    fn list_skips_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path());
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        for k in ["b", "a"] {
            let h = store.create_handle(&key(k));
            store.save(&h, &mut ledger(k)).unwrap();
        }
        let keys: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|h| h.job_key.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn in_memory_store_injects_save_failures() {
        let store = InMemoryLedgerStore::new();
        let handle = store.create_handle(&key("abc"));
        store.fail_next_saves(1);

        assert!(store.save(&handle, &mut ledger("abc")).is_err());
        assert!(store.save(&handle, &mut ledger("abc")).is_ok());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.find_existing(&key("abc")).unwrap(), Some(handle));
    }
}
