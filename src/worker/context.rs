use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::feed::{FeedParser, FeedRsParser, HtmlScraper, Scraper};
use crate::http::{HttpClient, HttpError};
use crate::storage::Storage;

use super::pending::PendingCounter;

/// Shared dependencies of every refresh component, built once at startup.
pub struct WorkerContext {
    pub http: HttpClient,
    pub storage: Arc<dyn Storage>,
    pub parser: Arc<dyn FeedParser>,
    pub scraper: Arc<dyn Scraper>,
    /// Concurrent fetch tasks per refresh cycle.
    pub workers: usize,
    pub pending: Arc<PendingCounter>,
    pub favicon_timeout: Duration,
}

impl WorkerContext {
    /// Context with the default parser and scraper.
    pub fn new(config: &Config, storage: Arc<dyn Storage>) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            storage,
            parser: Arc::new(FeedRsParser),
            scraper: Arc::new(HtmlScraper),
            workers: config.worker_count(),
            pending: Arc::new(PendingCounter::new()),
            favicon_timeout: config.favicon_timeout(),
        })
    }

    pub fn with_http(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}
