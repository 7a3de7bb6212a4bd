//! Rate limiting for tiles whose decode keeps failing.
//!
//! A corrupt tile in a slide fails the same way every time it is requested.
//! Each consecutive failure doubles the time before the tile may be decoded
//! again, up to a ceiling. Records are kept in a bounded LRU so a slide full
//! of broken tiles cannot grow the table without limit.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::error::DecodeError;

use super::coord::TileCoord;

/// Wait after the first failure.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Longest wait between attempts.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Maximum number of failing tiles remembered.
pub const DEFAULT_FAILURE_RECORDS: usize = 4096;

/// Back-off parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_records: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max: DEFAULT_BACKOFF_MAX,
            max_records: DEFAULT_FAILURE_RECORDS,
        }
    }
}

impl BackoffPolicy {
    /// Wait imposed after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    failures: u32,
    retry_at: Instant,
    cause: Arc<DecodeError>,
}

/// A tile currently refused because of recent failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub failures: u32,
    pub retry_in: Duration,
    pub cause: Arc<DecodeError>,
}

/// Per-tile failure history.
pub struct FailureTracker {
    policy: BackoffPolicy,
    records: Mutex<LruCache<TileCoord, FailureRecord>>,
}

impl FailureTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        let records = NonZeroUsize::new(policy.max_records).unwrap_or(NonZeroUsize::MIN);
        Self {
            policy,
            records: Mutex::new(LruCache::new(records)),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// The active back-off for `coord`, if it must not be decoded yet.
    pub fn check(&self, coord: TileCoord) -> Option<Backoff> {
        self.check_at(coord, Instant::now())
    }

    fn check_at(&self, coord: TileCoord, now: Instant) -> Option<Backoff> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.peek(&coord)?;
        if now >= record.retry_at {
            return None;
        }
        Some(Backoff {
            failures: record.failures,
            retry_in: record.retry_at - now,
            cause: record.cause.clone(),
        })
    }

    /// Record a failed decode; returns the consecutive failure count.
    pub fn record_failure(&self, coord: TileCoord, cause: Arc<DecodeError>) -> u32 {
        let now = Instant::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let failures = records
            .get(&coord)
            .map(|record| record.failures.saturating_add(1))
            .unwrap_or(1);
        records.put(
            coord,
            FailureRecord {
                failures,
                retry_at: now + self.policy.delay(failures),
                cause,
            },
        );
        failures
    }

    /// Forget failures for `coord` after a successful decode.
    pub fn record_success(&self, coord: TileCoord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.pop(&coord);
    }

    /// Number of tiles with a failure history.
    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
