use anyhow::Result;

use super::schema::Database;

/// Items indexed per transaction while syncing.
const SYNC_BATCH_SIZE: i64 = 200;

impl Database {
    // ========================================================================
    // Search Index
    // ========================================================================

    /// Index every item that has no search row yet. Returns the number of
    /// items indexed.
    pub async fn sync_search(&self) -> Result<usize> {
        let mut indexed = 0;

        loop {
            let mut tx = self.pool.begin().await?;
            let pending: Vec<(i64, String, String)> = sqlx::query_as(
                "SELECT id, title, content FROM items WHERE search_rowid IS NULL ORDER BY id LIMIT ?",
            )
            .bind(SYNC_BATCH_SIZE)
            .fetch_all(&mut *tx)
            .await?;

            if pending.is_empty() {
                break;
            }

            for (id, title, content) in &pending {
                let rowid = sqlx::query("INSERT INTO search (title, content) VALUES (?, ?)")
                    .bind(title)
                    .bind(content)
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid();

                sqlx::query("UPDATE items SET search_rowid = ? WHERE id = ?")
                    .bind(rowid)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            indexed += pending.len();
        }

        if indexed > 0 {
            tracing::debug!(indexed, "Search index synced");
        }
        Ok(indexed)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Item, ItemStatus};
    use chrono::Utc;

    /// Titles of indexed items matching an FTS5 query.
    async fn matching_titles(db: &Database, query: &str) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT i.title FROM items i JOIN search ON search.rowid = i.search_rowid \
             WHERE search MATCH ? ORDER BY i.id",
        )
        .bind(query)
        .fetch_all(&db.pool)
        .await
        .unwrap()
    }

    async fn test_db_with_feed() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db
            .insert_feed("Feed", "https://example.com", "https://example.com/feed")
            .await
            .unwrap();
        (db, feed_id)
    }

    fn test_item(feed_id: i64, guid: &str, title: &str) -> Item {
        Item {
            guid: guid.to_string(),
            feed_id,
            title: title.to_string(),
            link: format!("https://example.com/{guid}"),
            content: "Body text".to_string(),
            date: Utc::now(),
            status: ItemStatus::Unread,
            image_url: None,
            audio_url: None,
        }
    }

    #[tokio::test]
    async fn test_items_not_searchable_until_synced() {
        let (db, feed_id) = test_db_with_feed().await;
        db.create_items(&[
            test_item(feed_id, "1", "Rust Programming Guide"),
            test_item(feed_id, "2", "Python Tutorial"),
        ])
        .await
        .unwrap();

        assert!(matching_titles(&db, "Rust").await.is_empty());

        assert_eq!(db.sync_search().await.unwrap(), 2);
        assert_eq!(
            matching_titles(&db, "Rust").await,
            vec!["Rust Programming Guide".to_string()]
        );
        assert_eq!(
            matching_titles(&db, "body").await,
            vec!["Rust Programming Guide".to_string(), "Python Tutorial".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sync_search_is_incremental() {
        let (db, feed_id) = test_db_with_feed().await;
        db.create_items(&[test_item(feed_id, "1", "First")])
            .await
            .unwrap();
        assert_eq!(db.sync_search().await.unwrap(), 1);
        assert_eq!(db.sync_search().await.unwrap(), 0);

        db.create_items(&[test_item(feed_id, "2", "Second")])
            .await
            .unwrap();
        assert_eq!(db.sync_search().await.unwrap(), 1);
    }
}
