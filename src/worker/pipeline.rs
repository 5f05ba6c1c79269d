use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::context::WorkerContext;
use crate::feed::{fetch_feed, FetchError};
use crate::storage::{Feed, Item};

/// Outcome for one feed of a refresh cycle.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_id: i64,
    /// Number of new items stored, or why the feed failed.
    pub result: Result<usize, FetchError>,
}

/// Everything a refresh cycle did, one entry per input feed in input order.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub results: Vec<FetchResult>,
}

impl CycleReport {
    pub fn new_items(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (i64, &FetchError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.feed_id, e)))
    }
}

/// What a fetch task hands to the aggregator.
struct FeedOutput {
    feed_id: i64,
    items: Result<Vec<Item>, FetchError>,
}

/// Run one refresh cycle over `feeds`.
///
/// `ctx.workers` tasks pull feeds from a queue holding the whole batch and
/// push one output per feed into a queue bounded by the worker count. The
/// aggregator stores items and decrements the pending counter once per
/// output. A failing feed only records its error; the rest of the batch
/// carries on.
pub async fn run_cycle(ctx: Arc<WorkerContext>, feeds: Vec<Feed>) -> CycleReport {
    let total = feeds.len();
    let started = Instant::now();
    let workers = ctx.workers.clamp(1, total.max(1));
    tracing::info!(feeds = total, workers, "Refresh cycle started");

    if let Err(e) = ctx.storage.reset_feed_errors().await {
        tracing::warn!(error = %e, "Failed to reset feed errors");
    }

    let (feed_tx, feed_rx) = mpsc::channel::<Feed>(total.max(1));
    for feed in &feeds {
        // Capacity covers the whole batch, so this never waits
        if feed_tx.send(feed.clone()).await.is_err() {
            break;
        }
    }
    drop(feed_tx);

    let feed_rx = Arc::new(Mutex::new(feed_rx));
    let (output_tx, mut output_rx) = mpsc::channel::<FeedOutput>(workers);

    let mut pool = JoinSet::new();
    for _ in 0..workers {
        pool.spawn(fetch_worker(ctx.clone(), feed_rx.clone(), output_tx.clone()));
    }
    drop(output_tx);

    // The output queue closes when the last worker drops its sender; this task
    // only has to surface workers that died.
    let coordinator = tokio::spawn(async move {
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Refresh worker terminated abnormally");
            }
        }
    });

    let mut outcomes: HashMap<i64, Result<usize, FetchError>> = HashMap::with_capacity(total);
    while let Some(output) = output_rx.recv().await {
        let outcome = match output.items {
            Ok(items) if items.is_empty() => Ok(0),
            Ok(items) => match ctx.storage.create_items(&items).await {
                Ok(created) => Ok(created),
                Err(e) => {
                    tracing::warn!(feed_id = output.feed_id, error = %e, "Failed to store items");
                    Ok(0)
                }
            },
            Err(e) => Err(e),
        };
        ctx.pending.decrement();
        outcomes.insert(output.feed_id, outcome);
    }

    if let Err(e) = coordinator.await {
        tracing::error!(error = %e, "Refresh coordinator failed");
    }

    let mut results = Vec::with_capacity(total);
    for feed in &feeds {
        let result = match outcomes.remove(&feed.id) {
            Some(result) => result,
            None => {
                let err = FetchError::Aborted;
                record_error(&ctx, feed.id, &err).await;
                Err(err)
            }
        };
        results.push(FetchResult {
            feed_id: feed.id,
            result,
        });
    }

    if let Err(e) = ctx.storage.sync_search().await {
        tracing::warn!(error = %e, "Failed to sync search index");
    }
    ctx.pending.reset();

    log_feed_errors(&ctx, &feeds).await;

    let report = CycleReport { results };
    tracing::info!(
        feeds = total,
        new_items = report.new_items(),
        failed = report.failures().count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Refresh cycle finished"
    );
    report
}

async fn fetch_worker(
    ctx: Arc<WorkerContext>,
    feeds: Arc<Mutex<mpsc::Receiver<Feed>>>,
    outputs: mpsc::Sender<FeedOutput>,
) {
    loop {
        let next = feeds.lock().await.recv().await;
        let Some(feed) = next else {
            break;
        };

        let items = fetch_feed(
            &ctx.http,
            ctx.storage.as_ref(),
            ctx.parser.as_ref(),
            &feed,
        )
        .await;

        if let Err(e) = &items {
            tracing::debug!(feed_id = feed.id, error = %e, "Feed refresh failed");
            record_error(&ctx, feed.id, e).await;
        }

        let output = FeedOutput {
            feed_id: feed.id,
            items,
        };
        if outputs.send(output).await.is_err() {
            break;
        }
    }
}

async fn record_error(ctx: &WorkerContext, feed_id: i64, error: &FetchError) {
    if let Err(e) = ctx.storage.set_feed_error(feed_id, &error.to_string()).await {
        tracing::warn!(feed_id, error = %e, "Failed to record feed error");
    }
}

async fn log_feed_errors(ctx: &WorkerContext, feeds: &[Feed]) {
    let errors = match ctx.storage.get_feed_errors().await {
        Ok(errors) => errors,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load feed errors");
            return;
        }
    };
    if errors.is_empty() {
        return;
    }

    let titles: HashMap<i64, &str> = feeds.iter().map(|f| (f.id, f.title.as_str())).collect();
    tracing::warn!(failed = errors.len(), "Some feeds failed to refresh");

    let mut failed: Vec<(&i64, &String)> = errors.iter().collect();
    failed.sort();
    for (feed_id, error) in failed {
        let title = titles.get(feed_id).copied().unwrap_or("<unknown>");
        tracing::warn!(feed_id = *feed_id, title = %title, error = %error, "Feed refresh failed");
    }
}
