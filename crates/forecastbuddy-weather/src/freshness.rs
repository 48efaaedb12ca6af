//! Decides whether a stored forecast must be re-fetched.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::ForecastRecord;

/// Time-to-live and per-fetch deadline applied by the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub ttl: Duration,
    pub timeout: Duration,
}

impl RefreshPolicy {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 60 * 60);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(ttl: Duration, timeout: Duration) -> Self {
        Self { ttl, timeout }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL, Self::DEFAULT_TIMEOUT)
    }
}

/// True when `record` is older than `ttl` at `now`.
///
/// A record whose age equals `ttl` is still fresh. Records stamped in the
/// future (clock skew) are fresh.
pub fn is_stale(record: &ForecastRecord, now: DateTime<Utc>, ttl: Duration) -> bool {
    let age = record.age(now);
    match age.to_std() {
        Ok(age) => age > ttl,
        // negative age
        Err(_) => false,
    }
}
