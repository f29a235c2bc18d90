//! Time-bucketed duplicate suppression
//!
//! MicroSIP tends to log one call several times (ringing, state changes,
//! retransmits). A caller is reported at most once per time bucket. Two
//! separate calls from the same number inside one bucket collapse into one.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::matcher::CallerId;

/// Default bucket width in seconds
pub const DEFAULT_BUCKET_SECS: u64 = 10;

/// Default number of past buckets to keep (~1 minute)
pub const DEFAULT_RETENTION_BUCKETS: u64 = 6;

/// Caller plus coarse time bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub caller: CallerId,
    pub bucket: i64,
}

/// Outcome for one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Suppress,
}

/// Set of recently reported callers, bounded by the retention window
#[derive(Debug)]
pub struct DedupeWindow {
    bucket_secs: i64,
    retention_buckets: i64,
    seen: HashSet<DedupeKey>,
}

impl Default for DedupeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SECS, DEFAULT_RETENTION_BUCKETS)
    }
}

impl DedupeWindow {
    pub fn new(bucket_secs: u64, retention_buckets: u64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1) as i64,
            retention_buckets: retention_buckets as i64,
            seen: HashSet::new(),
        }
    }

    /// Bucket index for a point in time
    pub fn bucket_of(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.bucket_secs)
    }

    /// Decide whether a detection at `now` should be reported.
    ///
    /// Expired keys are dropped first; an accepted caller is remembered for
    /// the current bucket.
    pub fn check(&mut self, caller: &CallerId, now: DateTime<Utc>) -> Verdict {
        let bucket = self.bucket_of(now);
        self.purge(bucket);

        let key = DedupeKey {
            caller: caller.clone(),
            bucket,
        };
        if self.seen.insert(key) {
            Verdict::Accept
        } else {
            Verdict::Suppress
        }
    }

    fn purge(&mut self, current_bucket: i64) {
        let oldest = current_bucket - self.retention_buckets;
        self.seen.retain(|k| k.bucket >= oldest);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn caller(s: &str) -> CallerId {
        CallerId::normalize(s).unwrap()
    }

    #[test]
    fn test_same_caller_same_bucket_is_suppressed() {
        let mut window = DedupeWindow::default();
        let c = caller("+491234567890");

        assert_eq!(window.check(&c, at(1_700_000_000)), Verdict::Accept);
        assert_eq!(window.check(&c, at(1_700_000_005)), Verdict::Suppress);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_next_bucket_is_accepted_again() {
        let mut window = DedupeWindow::default();
        let c = caller("+491234567890");

        assert_eq!(window.check(&c, at(1_700_000_000)), Verdict::Accept);
        assert_eq!(window.check(&c, at(1_700_000_010)), Verdict::Accept);
    }

    #[test]
    fn test_different_callers_do_not_collide() {
        let mut window = DedupeWindow::default();
        let now = at(1_700_000_000);

        assert_eq!(window.check(&caller("+4911"), now), Verdict::Accept);
        assert_eq!(window.check(&caller("+4922"), now), Verdict::Accept);
    }

    #[test]
    fn test_old_keys_are_purged() {
        let mut window = DedupeWindow::new(10, 6);
        for i in 0..5 {
            window.check(&caller(&format!("+49{}", i)), at(1_700_000_000));
        }
        assert_eq!(window.len(), 5);

        // Seven buckets later everything from the first bucket is gone
        window.check(&caller("+4999"), at(1_700_000_070));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_keys_inside_retention_survive() {
        let mut window = DedupeWindow::new(10, 6);
        window.check(&caller("+4911"), at(1_700_000_000));
        window.check(&caller("+4922"), at(1_700_000_060));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_bucket_of() {
        let window = DedupeWindow::new(10, 6);
        assert_eq!(window.bucket_of(at(1_700_000_009)), 170_000_000);
        assert_eq!(window.bucket_of(at(1_700_000_010)), 170_000_001);
    }
}
