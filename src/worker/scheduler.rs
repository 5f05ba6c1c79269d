use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::context::WorkerContext;
use super::pipeline::{run_cycle, CycleReport};
use crate::feed::{
    self, resolve_favicon, DiscoverResult, DiscoveryError, FaviconError, FaviconLookup, FetchError,
};
use crate::storage::Feed;

/// Interval between purges of old items.
const MAINTENANCE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of asking for a refresh.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A new cycle is running; the handle resolves to its report.
    Started(JoinHandle<CycleReport>),
    /// A cycle is already in flight; nothing was started.
    AlreadyRunning,
    /// Storage holds no feeds.
    NothingToRefresh,
}

/// A spawned loop that runs until its token is cancelled.
struct BackgroundTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(task(stop.clone()));
        Self { stop, handle }
    }

    async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
}

/// Top-level refresh controller.
///
/// At most one refresh cycle runs at a time. The periodic timer and the
/// maintenance loop are each owned by exactly one [`BackgroundTask`], which is
/// stopped and awaited before a replacement is installed.
pub struct Worker {
    ctx: Arc<WorkerContext>,
    refresh_lock: Mutex<()>,
    timer: Mutex<Option<BackgroundTask>>,
    maintenance: Mutex<Option<BackgroundTask>>,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ctx),
            refresh_lock: Mutex::new(()),
            timer: Mutex::new(None),
            maintenance: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Feeds not yet completed in the current cycle.
    pub fn feeds_pending(&self) -> i32 {
        self.ctx.pending.get()
    }

    /// Start a refresh cycle over every stored feed, unless one is running.
    pub async fn refresh_feeds(&self) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;

        let pending = self.ctx.pending.get();
        if pending > 0 {
            tracing::info!(pending, "Refresh already in progress, ignoring request");
            return Ok(RefreshOutcome::AlreadyRunning);
        }

        let feeds = self.ctx.storage.list_feeds().await?;
        if feeds.is_empty() {
            tracing::info!("No feeds to refresh");
            return Ok(RefreshOutcome::NothingToRefresh);
        }

        self.ctx
            .pending
            .set(i32::try_from(feeds.len()).unwrap_or(i32::MAX));
        let ctx = self.ctx.clone();
        Ok(RefreshOutcome::Started(tokio::spawn(run_cycle(ctx, feeds))))
    }

    /// Report the current cycle as finished.
    ///
    /// Fetches already in flight run to completion; only the pending count
    /// is cleared.
    pub async fn stop_refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.ctx.pending.reset();
        tracing::info!("Refresh stopped");
    }

    /// Refresh every `minutes` minutes; zero turns periodic refresh off.
    ///
    /// Any previous timer is stopped and awaited first. The first tick
    /// happens one full period after the call.
    pub async fn set_refresh_rate(self: &Arc<Self>, minutes: u64) {
        let mut slot = self.timer.lock().await;
        if let Some(task) = slot.take() {
            task.stop().await;
            tracing::info!("Refresh timer stopped");
        }
        if minutes == 0 {
            return;
        }

        let period = Duration::from_secs(minutes.saturating_mul(60));
        let worker = Arc::downgrade(self);
        tracing::info!(minutes, "Refresh timer started");

        *slot = Some(BackgroundTask::spawn(move |stop| async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(worker) = worker.upgrade() else {
                            break;
                        };
                        tracing::info!(minutes, "Refresh timer fired");
                        if let Err(e) = worker.refresh_feeds().await {
                            tracing::warn!(error = %e, "Scheduled refresh failed to start");
                        }
                    }
                }
            }
        }));
    }

    /// Purge old items now and then once a day, until shutdown.
    pub async fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock().await;
        if let Some(task) = slot.take() {
            task.stop().await;
        }

        let storage = self.ctx.storage.clone();
        *slot = Some(BackgroundTask::spawn(move |stop| async move {
            let mut ticker = interval(MAINTENANCE_PERIOD);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match storage.delete_old_items().await {
                            Ok(deleted) => tracing::info!(deleted, "Purged old items"),
                            Err(e) => tracing::warn!(error = %e, "Failed to purge old items"),
                        }
                    }
                }
            }
        }));
    }

    /// Look up icons for every feed that has none, one feed at a time, in
    /// the background.
    pub fn find_favicons(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            let feeds = match worker.ctx.storage.list_feeds_missing_icons().await {
                Ok(feeds) => feeds,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to list feeds missing icons");
                    return;
                }
            };
            tracing::debug!(feeds = feeds.len(), "Favicon sweep started");
            for feed in &feeds {
                // Outcomes are logged and stored by find_feed_favicon
                let _ = worker.find_feed_favicon(feed).await;
            }
        })
    }

    /// Resolve and store the icon for one feed within the favicon deadline.
    ///
    /// A missing icon is stored as empty so sweeps skip the feed; a lookup
    /// that hits the deadline stores nothing.
    pub async fn find_feed_favicon(&self, feed: &Feed) -> Result<FaviconLookup, FaviconError> {
        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        let timeout = self.ctx.favicon_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });

        let lookup = resolve_favicon(
            &self.ctx.http,
            self.ctx.scraper.as_ref(),
            &feed.link,
            &feed.feed_link,
            &cancel,
        )
        .await;
        timer.abort();

        let icon: Option<&[u8]> = match &lookup {
            Ok(FaviconLookup::Found { bytes, .. }) => Some(bytes.as_slice()),
            Ok(FaviconLookup::Missing { reason }) => {
                tracing::info!(
                    feed_id = feed.id,
                    title = %feed.title,
                    reason = reason.as_deref().unwrap_or("no candidates"),
                    "No favicon found"
                );
                Some(&[][..])
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, title = %feed.title, error = %e, "Favicon lookup timed out");
                None
            }
        };

        if let Some(icon) = icon {
            if let Err(e) = self.ctx.storage.update_feed_icon(feed.id, icon).await {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to store favicon");
            }
        }
        lookup
    }

    pub async fn discover_feed(&self, url: &str) -> Result<DiscoverResult, DiscoveryError> {
        feed::discover_feed(
            &self.ctx.http,
            self.ctx.parser.as_ref(),
            self.ctx.scraper.as_ref(),
            url,
        )
        .await
    }

    pub async fn fetch_page_body(&self, url: &str) -> Result<String, FetchError> {
        feed::fetch_page_body(&self.ctx.http, url).await
    }

    /// Stop the refresh timer and the maintenance loop and wait for both.
    pub async fn shutdown(&self) {
        if let Some(task) = self.timer.lock().await.take() {
            task.stop().await;
        }
        if let Some(task) = self.maintenance.lock().await.take() {
            task.stop().await;
        }
        tracing::info!("Worker shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{HttpState, Item, Storage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Storage with no feeds that counts the calls the scheduler makes.
    #[derive(Default)]
    struct CountingStorage {
        list_calls: AtomicUsize,
        purge_calls: AtomicUsize,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn list_feeds(&self) -> anyhow::Result<Vec<Feed>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn list_feeds_missing_icons(&self) -> anyhow::Result<Vec<Feed>> {
            Ok(Vec::new())
        }
        async fn get_http_state(&self, _: i64) -> anyhow::Result<Option<HttpState>> {
            Ok(None)
        }
        async fn set_http_state(&self, _: i64, _: &HttpState) -> anyhow::Result<()> {
            Ok(())
        }
        async fn create_items(&self, items: &[Item]) -> anyhow::Result<usize> {
            Ok(items.len())
        }
        async fn update_feed_icon(&self, _: i64, _: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reset_feed_errors(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_feed_error(&self, _: i64, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_feed_errors(&self) -> anyhow::Result<HashMap<i64, String>> {
            Ok(HashMap::new())
        }
        async fn delete_old_items(&self) -> anyhow::Result<u64> {
            self.purge_calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
        async fn sync_search(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    fn worker() -> (Arc<Worker>, Arc<CountingStorage>) {
        let storage = Arc::new(CountingStorage::default());
        let ctx = WorkerContext::new(&Config::default(), storage.clone()).unwrap();
        (Worker::new(ctx), storage)
    }

    #[tokio::test]
    async fn test_refresh_without_feeds_is_noop() {
        let (worker, _) = worker();
        let outcome = worker.refresh_feeds().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::NothingToRefresh));
        assert_eq!(worker.feeds_pending(), 0);
    }

    #[tokio::test]
    async fn test_refresh_while_pending_is_noop() {
        let (worker, storage) = worker();
        worker.context().pending.set(3);

        let outcome = worker.refresh_feeds().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::AlreadyRunning));
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(worker.feeds_pending(), 3);

        worker.stop_refresh().await;
        assert_eq!(worker.feeds_pending(), 0);
    }

    #[tokio::test]
    async fn test_stop_refresh_waits_for_refresh_lock() {
        let (worker, _) = worker();
        worker.context().pending.set(2);

        let guard = worker.refresh_lock.lock().await;
        let stopper = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.stop_refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.feeds_pending(), 2);

        drop(guard);
        stopper.await.unwrap();
        assert_eq!(worker.feeds_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_each_period_until_disabled() {
        let (worker, storage) = worker();
        worker.set_refresh_rate(1).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 2);

        worker.set_refresh_rate(0).await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changing_rate_replaces_timer() {
        let (worker, storage) = worker();
        worker.set_refresh_rate(1).await;
        worker.set_refresh_rate(5).await;

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(storage.list_calls.load(Ordering::SeqCst), 1);

        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_runs_at_start_then_daily() {
        let (worker, storage) = worker();
        worker.start_maintenance().await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(storage.purge_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(MAINTENANCE_PERIOD).await;
        assert_eq!(storage.purge_calls.load(Ordering::SeqCst), 2);

        worker.shutdown().await;
        tokio::time::sleep(MAINTENANCE_PERIOD * 2).await;
        assert_eq!(storage.purge_calls.load(Ordering::SeqCst), 2);
    }
}
