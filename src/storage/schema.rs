use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Items kept per feed regardless of age.
    pub const ITEMS_KEEP_SIZE: i64 = 50;

    /// Read items older than this are purged by maintenance.
    pub const ITEMS_KEEP_DAYS: i64 = 90;

    /// Open a database connection pool and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database shared by the pool.
    pub async fn open(path: &str) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout lets refresh workers wait out each other's write locks
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run schema migrations in one transaction. Every statement is
    /// idempotent, so re-running on an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                feed_link TEXT UNIQUE NOT NULL,
                icon BLOB
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                guid TEXT NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                content TEXT NOT NULL,
                date INTEGER NOT NULL,
                date_arrived INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                image TEXT,
                audio_url TEXT,
                search_rowid INTEGER,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_feed_date ON items(feed_id, date)")
            .execute(&mut *tx)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_search_rowid ON items(search_rowid)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS http_states (
                feed_id INTEGER PRIMARY KEY REFERENCES feeds(id) ON DELETE CASCADE,
                last_refreshed INTEGER NOT NULL,
                last_modified TEXT,
                etag TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_errors (
                feed_id INTEGER PRIMARY KEY REFERENCES feeds(id) ON DELETE CASCADE,
                error TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS search USING fts5(title, content)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
