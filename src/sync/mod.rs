// sync/mod.rs - Background sync worker lifecycle
//
// One owning task runs sync cycles on an interval, selecting between the
// ticker, an explicit stop signal, and cancellation. Start and Stop are both
// idempotent; Stop blocks until the task has observed the signal and finished
// its in-flight work.

pub mod details;
pub mod embedded;
pub mod engine;

pub use details::{DetailBatch, RateLimitLatch, DETAIL_BATCH_SIZE, RATE_LIMIT_BACKOFF_SECS};
pub use engine::{SyncEngine, SyncStats};

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::LinearClient;
use crate::config::SyncConfig;
use crate::db::Store;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct WorkerState {
    running: bool,
    last_sync: Option<DateTime<Utc>>,
}

struct OwnedTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The background sync worker.
///
/// Holds non-owning references to the store and remote client. The internal
/// cancellation token is shared with the cycle engine so parent cancellation
/// tears down an in-flight walk at its next suspension point.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    config: SyncConfig,
    state: Arc<RwLock<WorkerState>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<OwnedTask>>,
}

impl SyncWorker {
    pub fn new(
        store: Arc<Store>,
        client: Arc<dyn LinearClient>,
        config: SyncConfig,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let engine = Arc::new(SyncEngine::new(
            store,
            client,
            config.page_size,
            Arc::new(RateLimitLatch::new()),
            cancel.child_token(),
        )?);
        Ok(Self {
            engine,
            config,
            state: Arc::new(RwLock::new(WorkerState::default())),
            cancel,
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Spawn the sync loop. A second call while the loop is alive is a
    /// no-op. The first cycle runs immediately.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some() && self.is_running() {
            tracing::debug!("Sync worker already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let interval = self.config.interval;

        if let Ok(mut guard) = state.write() {
            guard.running = true;
        }

        let loop_state = state.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.run_cycle().await {
                            Ok(stats) => {
                                if let Ok(mut guard) = loop_state.write() {
                                    guard.last_sync = Some(Utc::now());
                                }
                                tracing::debug!(
                                    "Background sync tick done ({} teams)",
                                    stats.teams_synced
                                );
                            }
                            Err(Error::Cancelled) => break,
                            Err(e) => tracing::warn!("Sync cycle failed: {}", e),
                        }
                    }
                    _ = stop_rx.changed() => break,
                    _ = cancel.cancelled() => break,
                }
            }

            if let Ok(mut guard) = loop_state.write() {
                guard.running = false;
            }
        });

        *task = Some(OwnedTask { stop_tx, handle });
        tracing::info!("Sync worker started (interval {:?})", interval);
    }

    /// Signal the loop and wait for it to exit. Idempotent; completes any
    /// in-flight upserts before returning.
    pub async fn stop(&self) {
        let owned = self.task.lock().await.take();
        if let Some(OwnedTask { stop_tx, handle }) = owned {
            let _ = stop_tx.send(true);
            let _ = handle.await;
            tracing::info!("Sync worker stopped");
        }
        if let Ok(mut guard) = self.state.write() {
            guard.running = false;
        }
    }

    /// Cancel everything the worker owns, including an in-flight cycle.
    /// Unlike `stop` this does not wait for the task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.state.read().map(|s| s.running).unwrap_or(false)
    }

    /// When the last successful cycle finished.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.read().ok().and_then(|s| s.last_sync)
    }

    /// Run one cycle synchronously on the caller.
    pub async fn sync_now(&self) -> Result<SyncStats> {
        let stats = self.engine.run_cycle().await?;
        if let Ok(mut guard) = self.state.write() {
            guard.last_sync = Some(Utc::now());
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::engine::tests::{make_team, ts, MockClient};
    use super::*;
    use crate::db::issues::tests::make_issue;
    use std::time::Duration;

    async fn worker_fixture() -> (tempfile::TempDir, Arc<Store>, Arc<MockClient>, SyncWorker) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("cache.db")).await.unwrap());
        let client = MockClient::with_teams(vec![make_team("t1", "ENG")]);
        client.set_pages("t1", vec![vec![make_issue("a", "t1", ts(5, 0))]]);
        let client = Arc::new(client);
        let worker = SyncWorker::new(
            store.clone(),
            client.clone(),
            SyncConfig {
                interval: Duration::from_secs(3600),
                page_size: 100,
            },
        )
        .unwrap();
        (dir, store, client, worker)
    }

    #[tokio::test]
    async fn test_sync_now_runs_one_cycle() {
        let (_dir, store, _client, worker) = worker_fixture().await;

        assert!(worker.last_sync().is_none());
        let stats = worker.sync_now().await.unwrap();
        assert_eq!(stats.issues_created, 1);
        assert!(worker.last_sync().is_some());
        assert!(store.get_issue("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_runs_first_cycle_immediately() {
        let (_dir, store, _client, worker) = worker_fixture().await;

        worker.start().await;
        assert!(worker.is_running());

        // The first tick fires at once; give the cycle a moment to land.
        for _ in 0..50 {
            if worker.last_sync().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(worker.last_sync().is_some());
        assert!(store.get_issue("a").await.unwrap().is_some());

        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (_dir, _store, client, worker) = worker_fixture().await;

        worker.start().await;
        worker.start().await;
        assert!(worker.is_running());

        for _ in 0..50 {
            if worker.last_sync().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // One owning task means one immediate cycle, so one page call.
        assert_eq!(
            client.page_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_dir, _store, _client, worker) = worker_fixture().await;

        worker.start().await;
        worker.stop().await;
        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let (_dir, _store, _client, worker) = worker_fixture().await;
        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_the_loop() {
        let (_dir, _store, _client, worker) = worker_fixture().await;

        worker.start().await;
        assert!(worker.is_running());

        worker.shutdown();
        for _ in 0..50 {
            if !worker.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!worker.is_running());

        // A cancelled worker refuses further cycles.
        assert!(matches!(worker.sync_now().await, Err(Error::Cancelled)));
    }
}
