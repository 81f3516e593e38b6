// sync/details.rs - Detail-fetch batching and the rate-limit latch

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// Issues per detail request. The remote enforces a per-request complexity
/// budget; 20 is the documented ceiling for this query shape.
pub const DETAIL_BATCH_SIZE: usize = 20;

/// How long detail fetches stay suspended after a rate-limit error.
pub const RATE_LIMIT_BACKOFF_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy)]
struct Latched {
    at: DateTime<Utc>,
    until: DateTime<Utc>,
}

/// Process-wide back-off marker for detail fetches.
///
/// When any detail call hits the remote's rate limit, every subsequent
/// detail call no-ops until the latch expires. Team and issue-page calls
/// never consult it: they are the high-value path, and a rate-limited page
/// walk fails the cycle and retries on the next tick instead.
pub struct RateLimitLatch {
    inner: RwLock<Option<Latched>>,
}

impl RateLimitLatch {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Whether detail fetches should currently be skipped.
    pub fn is_latched(&self) -> bool {
        self.inner
            .read()
            .map(|guard| guard.map(|l| Utc::now() < l.until).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Record a rate-limit event: back off for the full window from now.
    pub fn trip(&self) {
        let now = Utc::now();
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(Latched {
                at: now,
                until: now + Duration::seconds(RATE_LIMIT_BACKOFF_SECS),
            });
        }
    }

    /// When the current back-off window ends, if one is active.
    pub fn latched_until(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.map(|l| l.until))
    }

    /// When the back-off was last tripped.
    pub fn latched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ok().and_then(|guard| guard.map(|l| l.at))
    }
}

impl Default for RateLimitLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates `(issue id, identifier)` pairs during a page walk, flushing
/// whenever a full batch is ready and once more at walk end.
#[derive(Debug, Default)]
pub struct DetailBatch {
    pending: Vec<(String, String)>,
}

impl DetailBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one issue. Returns true when the batch has reached flush size.
    pub fn push(&mut self, issue_id: String, identifier: String) -> bool {
        self.pending.push((issue_id, identifier));
        self.pending.len() >= DETAIL_BATCH_SIZE
    }

    /// Take everything queued so far.
    pub fn take(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_starts_open() {
        let latch = RateLimitLatch::new();
        assert!(!latch.is_latched());
        assert!(latch.latched_until().is_none());
    }

    #[test]
    fn test_trip_latches_for_full_window() {
        let latch = RateLimitLatch::new();
        let before = Utc::now();
        latch.trip();

        assert!(latch.is_latched());
        let until = latch.latched_until().unwrap();
        assert!(until >= before + Duration::seconds(RATE_LIMIT_BACKOFF_SECS));
        assert!(latch.latched_at().unwrap() >= before);
    }

    #[test]
    fn test_batch_flush_threshold() {
        let mut batch = DetailBatch::new();
        for n in 0..DETAIL_BATCH_SIZE - 1 {
            assert!(!batch.push(format!("i{}", n), format!("ENG-{}", n)));
        }
        assert!(batch.push("last".to_string(), "ENG-last".to_string()));
        assert_eq!(batch.len(), DETAIL_BATCH_SIZE);

        let taken = batch.take();
        assert_eq!(taken.len(), DETAIL_BATCH_SIZE);
        assert!(batch.is_empty());
    }
}
