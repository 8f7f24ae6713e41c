//! Periodic and final persistence of a run's ledger.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::checkpoint::{LedgerHandle, LedgerStore, LedgerStoreError, ProgressLedger};

/// Couples a run's [`ProgressLedger`] with the store it is flushed to.
pub struct Checkpointer {
    ledger: Arc<ProgressLedger>,
    store: Arc<dyn LedgerStore>,
    handle: LedgerHandle,
    interval: Duration,
    // Held for the whole snapshot-and-write so flushes land in order.
    last_flush: Mutex<Instant>,
}

impl Checkpointer {
    pub fn new(
        ledger: Arc<ProgressLedger>,
        store: Arc<dyn LedgerStore>,
        handle: LedgerHandle,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            handle,
            interval,
            last_flush: Mutex::new(Instant::now()),
        }
    }

    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }

    pub fn handle(&self) -> &LedgerHandle {
        &self.handle
    }

    fn write(&self) -> Result<(), LedgerStoreError> {
        let mut snapshot = self.ledger.stamp_for_save();
        self.store.save(&self.handle, &mut snapshot)
    }

    /// Flush now, regardless of the interval.
    pub fn flush(&self) -> Result<(), LedgerStoreError> {
        let mut last = self.last_flush.lock().unwrap_or_else(PoisonError::into_inner);
        self.write()?;
        *last = Instant::now();
        Ok(())
    }

    /// Flush when the interval has elapsed since the last attempt.
    ///
    /// A failed write is logged and retried at the next interval; it never
    /// interrupts processing. Returns whether a flush succeeded.
    pub fn flush_if_due(&self) -> bool {
        let mut last = self.last_flush.lock().unwrap_or_else(PoisonError::into_inner);
        if last.elapsed() < self.interval {
            return false;
        }
        *last = Instant::now();
        match self.write() {
            Ok(()) => {
                debug!(job_key = %self.handle.job_key, "periodic ledger flush");
                true
            }
            Err(e) => {
                warn!(
                    job_key = %self.handle.job_key,
                    error = %e,
                    retry_in_secs = self.interval.as_secs(),
                    "periodic ledger flush failed"
                );
                false
            }
        }
    }

    /// Flush at job end, retrying with capped exponential backoff.
    ///
    /// `max_attempts = None` retries until the write succeeds.
    pub fn flush_final(
        &self,
        max_attempts: Option<u32>,
        base_delay: Duration,
    ) -> Result<(), LedgerStoreError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.flush() {
                Ok(()) => {
                    info!(
                        job_key = %self.handle.job_key,
                        path = %self.handle.path.display(),
                        attempt,
                        "ledger flushed"
                    );
                    return Ok(());
                }
                Err(e) if max_attempts.is_some_and(|max| attempt >= max) => {
                    warn!(
                        job_key = %self.handle.job_key,
                        attempt,
                        error = %e,
                        "final ledger flush exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff(base_delay, attempt);
                    warn!(
                        job_key = %self.handle.job_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "final ledger flush failed, retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(30_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{InMemoryLedgerStore, Ledger};
    use summarizer_core::JobKey;

    fn setup(interval: Duration) -> (Arc<InMemoryLedgerStore>, Checkpointer) {
        let key = JobKey::new("job").unwrap();
        let store = Arc::new(InMemoryLedgerStore::new());
        let handle = store.create_handle(&key);
        let ledger = Arc::new(ProgressLedger::new(Ledger::new(
            key,
            "Inbox",
            0,
            serde_json::Value::Null,
        )));
        let cp = Checkpointer::new(ledger, store.clone(), handle, interval);
        (store, cp)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
        assert_eq!(backoff(base, 30), Duration::from_millis(30_000));
    }

    #[test]
    fn flush_if_due_respects_interval() {
        let (store, cp) = setup(Duration::from_secs(3600));
        assert!(!cp.flush_if_due());
        assert_eq!(store.save_count(), 0);

        let (store, cp) = setup(Duration::ZERO);
        assert!(cp.flush_if_due());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn failed_periodic_flush_does_not_panic_and_retries_next_time() {
        let (store, cp) = setup(Duration::ZERO);
        store.fail_next_saves(1);
        assert!(!cp.flush_if_due());
        assert!(cp.flush_if_due());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn final_flush_retries_until_success() {
        let (store, cp) = setup(Duration::from_secs(60));
        store.fail_next_saves(2);
        cp.flush_final(None, Duration::from_millis(1)).unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn bounded_final_flush_gives_up() {
        let (store, cp) = setup(Duration::from_secs(60));
        store.fail_next_saves(5);
        assert!(cp.flush_final(Some(2), Duration::from_millis(1)).is_err());
        assert_eq!(store.save_count(), 0);
    }
}
