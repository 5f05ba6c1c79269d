mod feeds;
mod items;
mod schema;
mod search;
mod types;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

pub use schema::Database;
pub use types::{Feed, HttpState, Item, ItemStatus};

/// Persistence operations the refresh engine depends on.
///
/// [`Database`] is the production implementation; tests substitute their own
/// to observe calls or inject failures.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<Feed>>;
    async fn list_feeds_missing_icons(&self) -> Result<Vec<Feed>>;
    async fn get_http_state(&self, feed_id: i64) -> Result<Option<HttpState>>;
    async fn set_http_state(&self, feed_id: i64, state: &HttpState) -> Result<()>;
    /// Returns the number of items that were new.
    async fn create_items(&self, items: &[Item]) -> Result<usize>;
    async fn update_feed_icon(&self, feed_id: i64, icon: &[u8]) -> Result<()>;
    async fn reset_feed_errors(&self) -> Result<()>;
    async fn set_feed_error(&self, feed_id: i64, error: &str) -> Result<()>;
    async fn get_feed_errors(&self) -> Result<HashMap<i64, String>>;
    async fn delete_old_items(&self) -> Result<u64>;
    async fn sync_search(&self) -> Result<usize>;
}

#[async_trait]
impl Storage for Database {
    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        Database::list_feeds(self).await
    }

    async fn list_feeds_missing_icons(&self) -> Result<Vec<Feed>> {
        Database::list_feeds_missing_icons(self).await
    }

    async fn get_http_state(&self, feed_id: i64) -> Result<Option<HttpState>> {
        Database::get_http_state(self, feed_id).await
    }

    async fn set_http_state(&self, feed_id: i64, state: &HttpState) -> Result<()> {
        Database::set_http_state(self, feed_id, state).await
    }

    async fn create_items(&self, items: &[Item]) -> Result<usize> {
        Database::create_items(self, items).await
    }

    async fn update_feed_icon(&self, feed_id: i64, icon: &[u8]) -> Result<()> {
        Database::update_feed_icon(self, feed_id, icon).await
    }

    async fn reset_feed_errors(&self) -> Result<()> {
        Database::reset_feed_errors(self).await
    }

    async fn set_feed_error(&self, feed_id: i64, error: &str) -> Result<()> {
        Database::set_feed_error(self, feed_id, error).await
    }

    async fn get_feed_errors(&self) -> Result<HashMap<i64, String>> {
        Database::get_feed_errors(self).await
    }

    async fn delete_old_items(&self) -> Result<u64> {
        Database::delete_old_items(self).await
    }

    async fn sync_search(&self) -> Result<usize> {
        Database::sync_search(self).await
    }
}
