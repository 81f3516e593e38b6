// repo/refresh.rs - Keyed background refresh scheduling
//
// One refresh per key at a time. The key is removed by a drop guard, so it
// clears whether the task finishes, fails, or unwinds on cancellation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Spawns deduplicated, cancel-aware refresh tasks.
pub(crate) struct RefreshScheduler {
    in_flight: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Spawn `task` under `key` unless a refresh with the same key is
    /// already in flight. Returns whether it was scheduled.
    ///
    /// Errors are logged; cancellation unwinds silently.
    pub fn schedule<F>(&self, key: String, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        {
            let mut set = match self.in_flight.lock() {
                Ok(set) => set,
                Err(_) => return false,
            };
            if !set.insert(key.clone()) {
                return false;
            }
        }

        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            key: key.clone(),
        };
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                // Shutdown wins over starting any remote work.
                biased;
                _ = cancel.cancelled() => {}
                result = task => match result {
                    Ok(()) | Err(Error::Cancelled) => {}
                    Err(e) => tracing::warn!("Background refresh {} failed: {}", key, e),
                },
            }
        });
        true
    }

    #[cfg(test)]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }
}

struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_is_deduplicated() {
        let scheduler = RefreshScheduler::new(CancellationToken::new());
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            scheduler.schedule("comments:i1".to_string(), async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        // Nothing has run yet on a current-thread runtime, so only the first
        // schedule call could claim the key.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_key_clears_after_failure() {
        let scheduler = RefreshScheduler::new(CancellationToken::new());

        assert!(scheduler.schedule("k".to_string(), async {
            Err(crate::Error::Network("boom".to_string()))
        }));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(scheduler.in_flight_count(), 0);

        // A later refresh under the same key is allowed again.
        assert!(scheduler.schedule("k".to_string(), async { Ok(()) }));
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_still_clears_keys() {
        let cancel = CancellationToken::new();
        let scheduler = RefreshScheduler::new(cancel.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        cancel.cancel();
        let task_runs = runs.clone();
        scheduler.schedule("k".to_string(), async move {
            task_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.in_flight_count(), 0);
    }
}
