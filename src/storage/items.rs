use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Item, ItemRow, ItemStatus};

/// Read items past the age cutoff, outside the newest-N window of their feed.
const PURGEABLE_ITEMS: &str = r#"
    feed_id = ?1 AND status = ?2 AND date_arrived < ?3
    AND id NOT IN (SELECT id FROM items WHERE feed_id = ?1 ORDER BY date DESC LIMIT ?4)
"#;

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Insert items, skipping any whose (feed, guid) pair is already stored.
    /// Returns the number of new items.
    ///
    /// Batches of 50 keep us well under SQLite's bound parameter limit
    /// (10 columns * 50 = 500).
    pub async fn create_items(&self, items: &[Item]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO items \
                 (guid, feed_id, title, link, content, date, date_arrived, status, image, audio_url) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(&item.guid)
                    .push_bind(item.feed_id)
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(&item.content)
                    .push_bind(item.date.timestamp())
                    .push_bind(now)
                    .push_bind(item.status.as_i64())
                    .push_bind(&item.image_url)
                    .push_bind(&item.audio_url);
            });

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted as usize)
    }

    /// Items of a feed, newest first.
    pub async fn get_items_for_feed(&self, feed_id: i64) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
                SELECT guid, feed_id, title, link, content, date, status, image, audio_url
                FROM items
                WHERE feed_id = ?
                ORDER BY date DESC, id DESC
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    pub async fn set_item_status(&self, feed_id: i64, guid: &str, status: ItemStatus) -> Result<()> {
        sqlx::query("UPDATE items SET status = ? WHERE feed_id = ? AND guid = ?")
            .bind(status.as_i64())
            .bind(feed_id)
            .bind(guid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Purge read items that arrived more than [`Self::ITEMS_KEEP_DAYS`] ago,
    /// always keeping the newest [`Self::ITEMS_KEEP_SIZE`] items of each feed.
    /// Returns the number of deleted items.
    pub async fn delete_old_items(&self) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(Self::ITEMS_KEEP_DAYS)).timestamp();

        let feed_ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT feed_id FROM items GROUP BY feed_id HAVING COUNT(*) > ?",
        )
        .bind(Self::ITEMS_KEEP_SIZE)
        .fetch_all(&self.pool)
        .await?;

        let mut deleted = 0;
        for (feed_id,) in feed_ids {
            let mut tx = self.pool.begin().await?;

            let search_cleanup = format!(
                "DELETE FROM search WHERE rowid IN \
                 (SELECT search_rowid FROM items WHERE search_rowid IS NOT NULL AND {PURGEABLE_ITEMS})"
            );
            sqlx::query(&search_cleanup)
                .bind(feed_id)
                .bind(ItemStatus::Read.as_i64())
                .bind(cutoff)
                .bind(Self::ITEMS_KEEP_SIZE)
                .execute(&mut *tx)
                .await?;

            let item_cleanup = format!("DELETE FROM items WHERE {PURGEABLE_ITEMS}");
            let result = sqlx::query(&item_cleanup)
                .bind(feed_id)
                .bind(ItemStatus::Read.as_i64())
                .bind(cutoff)
                .bind(Self::ITEMS_KEEP_SIZE)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }
}
