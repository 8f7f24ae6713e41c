//! Run configuration for the batch engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_CHECKPOINT_DIR: &str = "/data/checkpoints";

/// What to do when the ledger for a job cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptLedgerPolicy {
    /// Fail the run with `RunError::CorruptLedger`.
    #[default]
    Abort,
    /// Leave the corrupt file in place and start a new ledger beside it.
    StartFresh,
}

/// Batch engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchConfig {
    /// Items per batch in batch-parallel mode.
    pub batch_size: usize,
    /// Concurrent workers per batch.
    pub max_workers: usize,
    /// Minimum time between periodic ledger flushes.
    pub checkpoint_flush_interval: Duration,
    /// When off, runs are one-shot and nothing is persisted.
    pub checkpointing: bool,
    pub checkpoint_dir: PathBuf,
    /// Progress log cadence in sequential mode, in processed items.
    pub progress_log_every: usize,
    /// Attempts for the flush at job end. `None` retries until success.
    pub final_flush_attempts: Option<u32>,
    /// Base delay between final flush attempts; doubles per attempt.
    pub final_flush_backoff: Duration,
    pub corrupt_ledger_policy: CorruptLedgerPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 4,
            checkpoint_flush_interval: Duration::from_secs(60),
            checkpointing: false,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            progress_log_every: 10,
            final_flush_attempts: None,
            final_flush_backoff: Duration::from_millis(500),
            corrupt_ledger_policy: CorruptLedgerPolicy::Abort,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_flush_interval = interval;
        self
    }

    pub fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing = enabled;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_progress_log_every(mut self, every: usize) -> Self {
        self.progress_log_every = every;
        self
    }

    pub fn with_final_flush_attempts(mut self, attempts: Option<u32>) -> Self {
        self.final_flush_attempts = attempts;
        self
    }

    pub fn with_final_flush_backoff(mut self, base: Duration) -> Self {
        self.final_flush_backoff = base;
        self
    }

    pub fn with_corrupt_ledger_policy(mut self, policy: CorruptLedgerPolicy) -> Self {
        self.corrupt_ledger_policy = policy;
        self
    }

    /// Sequential mode unless both batching and parallelism are enabled.
    pub fn is_sequential(&self) -> bool {
        self.batch_size <= 1 || self.max_workers <= 1
    }

    /// Read configuration from the process environment.
    ///
    /// Recognised variables: `BATCH_SIZE`, `MAX_WORKERS`, `CHECKPOINT_INTERVAL`
    /// (seconds), `UNATTENDED_MODE`, `CHECKPOINT_DIR`, `PROGRESS_LOG_EVERY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`BatchConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BATCH_SIZE") {
            config.batch_size = parse_count("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_WORKERS") {
            config.max_workers = parse_count("MAX_WORKERS", &v)?;
        }
        if let Some(v) = get("CHECKPOINT_INTERVAL") {
            config.checkpoint_flush_interval =
                Duration::from_secs(parse_count("CHECKPOINT_INTERVAL", &v)? as u64);
        }
        if let Some(v) = get("UNATTENDED_MODE") {
            config.checkpointing = parse_bool("UNATTENDED_MODE", &v)?;
        }
        if let Some(v) = get("CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("PROGRESS_LOG_EVERY") {
            config.progress_log_every = parse_count("PROGRESS_LOG_EVERY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "0", "must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", "0", "must be at least 1"));
        }
        Ok(())
    }

    /// Snapshot recorded in a new ledger's `config` field.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "batch_size": self.batch_size,
            "max_workers": self.max_workers,
            "checkpoint_interval_secs": self.checkpoint_flush_interval.as_secs(),
        })
    }
}

fn parse_count(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}
