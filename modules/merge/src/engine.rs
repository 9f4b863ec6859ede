use crate::Rollup;
use rand::{thread_rng, Rng};
use scan_core::{identity_key, ReportStore, Stamp, StoreError, WriteCondition};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored {index}/{id} is not a valid rollup: {source}")]
    Decode { index: &'static str, id: String, source: serde_json::Error },
    #[error("encoding rollup: {0}")]
    Encode(serde_json::Error),
    #[error("{index}/{id} still conflicting after {attempts} attempts")]
    Contended { index: &'static str, id: String, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
}

/// The persisted record and how it came to be.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<R> {
    pub outcome: MergeOutcome,
    pub rollup: R,
    pub version: u64,
}

/// Fixed set of mutexes; an identity always maps to the same shard.
#[derive(Debug)]
pub struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new(shards: usize) -> Self {
        KeyLocks { shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect() }
    }

    pub fn lock(&self, index: &str, key: &str) -> MutexGuard<'_, ()> {
        let mut h = DefaultHasher::new();
        index.hash(&mut h);
        key.hash(&mut h);
        let shard = (h.finish() % self.shards.len() as u64) as usize;
        self.shards[shard].lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        KeyLocks::new(64)
    }
}

/// Read-merge-write against a `ReportStore`. Writers in this process are
/// serialized per identity; writers elsewhere are caught by the version check
/// and retried with jittered backoff.
pub struct MergeEngine {
    store: Arc<dyn ReportStore>,
    locks: KeyLocks,
    max_attempts: u32,
    retry_delay: Duration,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        MergeEngine { store, locks: KeyLocks::default(), max_attempts: 5, retry_delay: Duration::from_millis(20) }
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn merge<R: Rollup>(&self, fresh: R, now: &Stamp) -> Result<Merged<R>, MergeError> {
        let id = identity_key(fresh.identity());
        let _guard = self.locks.lock(R::INDEX, &id);

        for attempt in 1..=self.max_attempts {
            let (merged, condition, outcome) = match self.store.get(R::INDEX, &id)? {
                None => (fresh.clone().merge_with(None, now), WriteCondition::Absent, MergeOutcome::Created),
                Some(stored) => {
                    let prior: R = serde_json::from_value(stored.document)
                        .map_err(|source| MergeError::Decode { index: R::INDEX, id: id.clone(), source })?;
                    (fresh.clone().merge_with(Some(&prior), now), WriteCondition::Version(stored.version), MergeOutcome::Updated)
                }
            };
            let document = serde_json::to_value(&merged).map_err(MergeError::Encode)?;
            match self.store.put(R::INDEX, &id, &document, condition) {
                Ok(version) => {
                    debug!(index = R::INDEX, identity = fresh.identity(), ?outcome, version, "rollup persisted");
                    return Ok(Merged { outcome, rollup: merged, version });
                }
                Err(StoreError::Conflict { .. }) if attempt < self.max_attempts => {
                    warn!(index = R::INDEX, identity = fresh.identity(), attempt, "concurrent rollup write, retrying");
                    std::thread::sleep(self.backoff(attempt));
                }
                Err(StoreError::Conflict { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MergeError::Contended { index: R::INDEX, id, attempts: self.max_attempts })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(6));
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        Duration::from_millis(exp + jitter)
    }
}
