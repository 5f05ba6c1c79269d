use anyhow::Result;
use std::collections::HashMap;

use super::schema::Database;
use super::types::{Feed, FeedRow, HttpState};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, or update title and site link when the feed address is
    /// already known. Returns the feed id either way.
    pub async fn insert_feed(&self, title: &str, link: &str, feed_link: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO feeds (title, link, feed_link) VALUES (?, ?, ?)
                ON CONFLICT(feed_link) DO UPDATE SET title = excluded.title, link = excluded.link
                RETURNING id
            "#,
        )
        .bind(title)
        .bind(link)
        .bind(feed_link)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT f.id, f.title, f.link, f.feed_link, e.error
                FROM feeds f
                LEFT JOIN feed_errors e ON e.feed_id = f.id
                ORDER BY f.title COLLATE NOCASE, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Feeds whose icon has never been looked up.
    pub async fn list_feeds_missing_icons(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT f.id, f.title, f.link, f.feed_link, e.error
                FROM feeds f
                LEFT JOIN feed_errors e ON e.feed_id = f.id
                WHERE f.icon IS NULL
                ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
                SELECT f.id, f.title, f.link, f.feed_link, e.error
                FROM feeds f
                LEFT JOIN feed_errors e ON e.feed_id = f.id
                WHERE f.id = ?
            "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Feed::from))
    }

    /// Store an icon. An empty slice marks the lookup as done with no result.
    pub async fn update_feed_icon(&self, feed_id: i64, icon: &[u8]) -> Result<()> {
        sqlx::query("UPDATE feeds SET icon = ? WHERE id = ?")
            .bind(icon)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_feed_icon(&self, feed_id: i64) -> Result<Option<Vec<u8>>> {
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as("SELECT icon FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(icon,)| icon))
    }

    // ========================================================================
    // HTTP Cache State
    // ========================================================================

    pub async fn get_http_state(&self, feed_id: i64) -> Result<Option<HttpState>> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT last_modified, etag FROM http_states WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(last_modified, etag)| HttpState {
            last_modified,
            etag,
        }))
    }

    /// Replace both validators for a feed.
    pub async fn set_http_state(&self, feed_id: i64, state: &HttpState) -> Result<()> {
        sqlx::query(
            r#"
                INSERT INTO http_states (feed_id, last_refreshed, last_modified, etag)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(feed_id) DO UPDATE SET
                    last_refreshed = excluded.last_refreshed,
                    last_modified = excluded.last_modified,
                    etag = excluded.etag
            "#,
        )
        .bind(feed_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(&state.last_modified)
        .bind(&state.etag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Feed Errors
    // ========================================================================

    pub async fn reset_feed_errors(&self) -> Result<()> {
        sqlx::query("DELETE FROM feed_errors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_feed_error(&self, feed_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
                INSERT INTO feed_errors (feed_id, error) VALUES (?, ?)
                ON CONFLICT(feed_id) DO UPDATE SET error = excluded.error
            "#,
        )
        .bind(feed_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_feed_errors(&self) -> Result<HashMap<i64, String>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT feed_id, error FROM feed_errors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
