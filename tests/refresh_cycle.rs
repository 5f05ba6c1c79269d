//! Integration tests for refresh cycles: fan-out over a batch of feeds,
//! error bookkeeping, conditional fetching and favicon lookup.
//!
//! Each test runs against its own wiremock server and in-memory database.

use std::sync::Arc;
use std::time::Duration;

use feedwell::config::{Config, HttpConfig};
use feedwell::feed::{FaviconError, FaviconLookup, IconKind};
use feedwell::http::{HttpClient, RetryPolicy};
use feedwell::storage::{Database, Feed};
use feedwell::worker::{CycleReport, RefreshOutcome, Worker, WorkerContext};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(title: &str, entries: &[&str]) -> String {
    let items: String = entries
        .iter()
        .map(|guid| {
            format!(
                "<item><guid>{guid}</guid><title>{title} {guid}</title>\
                 <link>https://example.com/{guid}</link>\
                 <description>About {guid}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><link>https://example.com/</link>{items}</channel></rss>"#
    )
}

fn context(db: &Database, workers: usize) -> WorkerContext {
    let http = HttpClient::new(&HttpConfig::default())
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
        });
    WorkerContext::new(&Config::default(), Arc::new(db.clone()))
        .unwrap()
        .with_http(http)
        .with_workers(workers)
}

async fn setup(workers: usize) -> (Database, Arc<Worker>) {
    let db = Database::open(":memory:").await.unwrap();
    let worker = Worker::new(context(&db, workers));
    (db, worker)
}

async fn add_feed(db: &Database, server: &MockServer, route: &str) -> Feed {
    let id = db
        .insert_feed(route, &server.uri(), &format!("{}{route}", server.uri()))
        .await
        .unwrap();
    db.get_feed(id).await.unwrap().unwrap()
}

async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn refresh(worker: &Worker) -> CycleReport {
    match worker.refresh_feeds().await.unwrap() {
        RefreshOutcome::Started(handle) => handle.await.unwrap(),
        other => panic!("expected a cycle to start, got {other:?}"),
    }
}

// ============================================================================
// Refresh Cycle Tests
// ============================================================================

#[tokio::test]
async fn test_cycle_stores_items_from_every_feed() {
    let server = MockServer::start().await;
    let (db, worker) = setup(2).await;

    let mut feeds = Vec::new();
    for (route, title) in [("/a.xml", "Alpha"), ("/b.xml", "Bravo"), ("/c.xml", "Charlie")] {
        serve(
            &server,
            route,
            ResponseTemplate::new(200).set_body_string(rss(title, &["one", "two"])),
        )
        .await;
        feeds.push(add_feed(&db, &server, route).await);
    }

    let report = refresh(&worker).await;

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.new_items(), 6);
    assert_eq!(report.failures().count(), 0);
    assert_eq!(worker.feeds_pending(), 0);
    for feed in &feeds {
        assert_eq!(db.get_items_for_feed(feed.id).await.unwrap().len(), 2);
    }

    // Search index is synced at the end of the cycle
    assert_eq!(db.sync_search().await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_feeds_complete_without_items() {
    let server = MockServer::start().await;
    let (db, worker) = setup(4).await;

    for route in ["/a.xml", "/b.xml", "/c.xml", "/d.xml", "/e.xml"] {
        serve(
            &server,
            route,
            ResponseTemplate::new(200).set_body_string(rss("Quiet", &[])),
        )
        .await;
        add_feed(&db, &server, route).await;
    }

    let report = refresh(&worker).await;

    assert_eq!(report.results.len(), 5);
    assert_eq!(report.new_items(), 0);
    assert_eq!(worker.feeds_pending(), 0);
    assert!(db.get_feed_errors().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_feeds_record_one_error_each() {
    let server = MockServer::start().await;
    let (db, worker) = setup(3).await;

    serve(
        &server,
        "/good.xml",
        ResponseTemplate::new(200).set_body_string(rss("Good", &["x"])),
    )
    .await;
    serve(&server, "/gone.xml", ResponseTemplate::new(404)).await;
    serve(&server, "/broken.xml", ResponseTemplate::new(500)).await;
    serve(
        &server,
        "/html.xml",
        ResponseTemplate::new(200).set_body_string("<html><body>not a feed</body></html>"),
    )
    .await;

    let good = add_feed(&db, &server, "/good.xml").await;
    let gone = add_feed(&db, &server, "/gone.xml").await;
    let broken = add_feed(&db, &server, "/broken.xml").await;
    let html = add_feed(&db, &server, "/html.xml").await;

    let report = refresh(&worker).await;

    assert_eq!(report.new_items(), 1);
    let mut failed: Vec<i64> = report.failures().map(|(id, _)| id).collect();
    failed.sort();
    assert_eq!(failed, vec![gone.id, broken.id, html.id]);
    assert_eq!(worker.feeds_pending(), 0);

    let errors = db.get_feed_errors().await.unwrap();
    assert_eq!(errors.len(), 3);
    assert!(!errors.contains_key(&good.id));
    assert_eq!(
        errors[&gone.id],
        format!("feed not found (404) for {}", gone.feed_link)
    );
    assert_eq!(
        errors[&broken.id],
        format!("server responded with code 500 for {}", broken.feed_link)
    );
    assert!(errors.contains_key(&html.id));
}

#[tokio::test]
async fn test_errors_reset_at_cycle_start() {
    let server = MockServer::start().await;
    let (db, worker) = setup(1).await;

    Mock::given(path("/flaky.xml"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(
        &server,
        "/flaky.xml",
        ResponseTemplate::new(200).set_body_string(rss("Flaky", &["x"])),
    )
    .await;
    let feed = add_feed(&db, &server, "/flaky.xml").await;

    refresh(&worker).await;
    assert!(db.get_feed_errors().await.unwrap().contains_key(&feed.id));

    let report = refresh(&worker).await;
    assert_eq!(report.new_items(), 1);
    assert!(db.get_feed_errors().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_while_running_is_ignored() {
    let server = MockServer::start().await;
    let (db, worker) = setup(2).await;

    for route in ["/a.xml", "/b.xml"] {
        serve(
            &server,
            route,
            ResponseTemplate::new(200)
                .set_body_string(rss("Slow", &["x"]))
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        add_feed(&db, &server, route).await;
    }

    let handle = match worker.refresh_feeds().await.unwrap() {
        RefreshOutcome::Started(handle) => handle,
        other => panic!("expected a cycle to start, got {other:?}"),
    };
    assert_eq!(worker.feeds_pending(), 2);
    assert!(matches!(
        worker.refresh_feeds().await.unwrap(),
        RefreshOutcome::AlreadyRunning
    ));

    let report = handle.await.unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(worker.feeds_pending(), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stopped_cycle_still_stores_items() {
    let server = MockServer::start().await;
    let (db, worker) = setup(2).await;

    let mut feeds = Vec::new();
    for route in ["/a.xml", "/b.xml", "/c.xml"] {
        serve(
            &server,
            route,
            ResponseTemplate::new(200)
                .set_body_string(rss("Slow", &["one", "two"]))
                .set_delay(Duration::from_millis(300)),
        )
        .await;
        feeds.push(add_feed(&db, &server, route).await);
    }

    let handle = match worker.refresh_feeds().await.unwrap() {
        RefreshOutcome::Started(handle) => handle,
        other => panic!("expected a cycle to start, got {other:?}"),
    };
    assert_eq!(worker.feeds_pending(), 3);

    worker.stop_refresh().await;
    assert_eq!(worker.feeds_pending(), 0);

    // In-flight fetches are not cancelled
    let report = handle.await.unwrap();
    assert_eq!(report.new_items(), 6);
    assert_eq!(worker.feeds_pending(), 0);
    for feed in &feeds {
        assert_eq!(db.get_items_for_feed(feed.id).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_unchanged_feed_is_fetched_conditionally() {
    let server = MockServer::start().await;
    let (db, worker) = setup(1).await;

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    serve(
        &server,
        "/feed.xml",
        ResponseTemplate::new(200)
            .set_body_string(rss("Cached", &["one", "two"]))
            .insert_header("ETag", "\"v1\""),
    )
    .await;
    let feed = add_feed(&db, &server, "/feed.xml").await;

    let first = refresh(&worker).await;
    assert_eq!(first.new_items(), 2);

    let second = refresh(&worker).await;
    assert_eq!(second.new_items(), 0);
    assert_eq!(second.failures().count(), 0);
    assert_eq!(db.get_items_for_feed(feed.id).await.unwrap().len(), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("If-None-Match").is_none());
    assert_eq!(
        requests[1].headers.get("If-None-Match").unwrap(),
        "\"v1\""
    );
}

#[tokio::test]
async fn test_refetched_items_are_not_duplicated() {
    let server = MockServer::start().await;
    let (db, worker) = setup(1).await;

    serve(
        &server,
        "/feed.xml",
        ResponseTemplate::new(200).set_body_string(rss("Same", &["one", "two"])),
    )
    .await;
    let feed = add_feed(&db, &server, "/feed.xml").await;

    assert_eq!(refresh(&worker).await.new_items(), 2);
    assert_eq!(refresh(&worker).await.new_items(), 0);
    assert_eq!(db.get_items_for_feed(feed.id).await.unwrap().len(), 2);
}

// ============================================================================
// Favicon Tests
// ============================================================================

#[tokio::test]
async fn test_missing_favicon_stores_empty_icon() {
    let server = MockServer::start().await;
    let (db, worker) = setup(1).await;
    let feed = add_feed(&db, &server, "/feed.xml").await;

    let lookup = worker.find_feed_favicon(&feed).await.unwrap();

    assert!(matches!(lookup, FaviconLookup::Missing { .. }));
    assert_eq!(db.get_feed_icon(feed.id).await.unwrap(), Some(Vec::new()));
    assert!(db.list_feeds_missing_icons().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_found_favicon_is_stored() {
    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    let server = MockServer::start().await;
    let (db, worker) = setup(1).await;
    serve(
        &server,
        "/favicon.ico",
        ResponseTemplate::new(200).set_body_bytes(PNG_BYTES),
    )
    .await;
    let feed = add_feed(&db, &server, "/feed.xml").await;

    match worker.find_feed_favicon(&feed).await.unwrap() {
        FaviconLookup::Found { kind, bytes, .. } => {
            assert_eq!(kind, IconKind::Png);
            assert_eq!(bytes, PNG_BYTES);
        }
        other => panic!("expected an icon, got {other:?}"),
    }
    assert_eq!(
        db.get_feed_icon(feed.id).await.unwrap(),
        Some(PNG_BYTES.to_vec())
    );
}

#[tokio::test]
async fn test_favicon_deadline_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let mut ctx = context(&db, 1);
    ctx.favicon_timeout = Duration::from_millis(100);
    let worker = Worker::new(ctx);
    let feed = add_feed(&db, &server, "/feed.xml").await;

    let started = std::time::Instant::now();
    let result = worker.find_feed_favicon(&feed).await;

    assert!(matches!(result, Err(FaviconError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(db.get_feed_icon(feed.id).await.unwrap(), None);
    let missing = db.list_feeds_missing_icons().await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, feed.id);
}

#[tokio::test]
async fn test_favicon_sweep_covers_feeds_without_icons() {
    const GIF_BYTES: &[u8] = b"GIF89a\x01\0\x01\0";

    let with_icon = MockServer::start().await;
    let without_icon = MockServer::start().await;
    let already_known = MockServer::start().await;
    let (db, worker) = setup(1).await;

    serve(
        &with_icon,
        "/favicon.ico",
        ResponseTemplate::new(200).set_body_bytes(GIF_BYTES),
    )
    .await;
    let found = add_feed(&db, &with_icon, "/feed.xml").await;
    let missing = add_feed(&db, &without_icon, "/feed.xml").await;
    let known = add_feed(&db, &already_known, "/feed.xml").await;
    db.update_feed_icon(known.id, GIF_BYTES).await.unwrap();

    worker.find_favicons().await.unwrap();

    assert_eq!(
        db.get_feed_icon(found.id).await.unwrap(),
        Some(GIF_BYTES.to_vec())
    );
    assert_eq!(db.get_feed_icon(missing.id).await.unwrap(), Some(Vec::new()));
    assert!(db.list_feeds_missing_icons().await.unwrap().is_empty());
    assert!(already_known.received_requests().await.unwrap().is_empty());
}
