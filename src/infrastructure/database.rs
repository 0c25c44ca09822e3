// Database - SQLite persistence for engagement rows, counters and notifications
// Every mutation runs inside a StoreTransaction so detail rows and counters commit together

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS write_gate (id INTEGER PRIMARY KEY, seq INTEGER NOT NULL)",
    "INSERT OR IGNORE INTO write_gate (id, seq) VALUES (1, 0)",
    r#"
    CREATE TABLE IF NOT EXISTS engageable_entities (
        id INTEGER PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('post', 'comment')),
        owner_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS engagement_counters (
        tenant_id INTEGER NOT NULL,
        entity_id INTEGER NOT NULL,
        field TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
        updated_time INTEGER NOT NULL,
        PRIMARY KEY (tenant_id, entity_id, field)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS likes (
        entity_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        tenant_id INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (entity_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        post_id INTEGER NOT NULL,
        author_id INTEGER NOT NULL,
        parent_id INTEGER,
        content TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('active', 'hidden', 'deleted')),
        is_edited INTEGER NOT NULL DEFAULT 0,
        edited_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS shares (
        id INTEGER PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        entity_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        platform TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_shares_entity ON shares(entity_id)",
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY,
        tenant_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        notification_type TEXT NOT NULL,
        category TEXT NOT NULL,
        priority TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        actor_id INTEGER,
        entity_id INTEGER,
        is_read INTEGER NOT NULL DEFAULT 0,
        read_at INTEGER,
        action_url TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(tenant_id, user_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_created ON notifications(created_at)",
];

/// Transaction wrapper for engagement writes
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction {
    /// Connection to run statements inside this transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the transaction
    pub async fn commit(self) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to commit transaction: {}", e)))
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to rollback transaction: {}", e)))
    }
}

/// Handle to the engagement database. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (or create) the database at `url` and make sure the schema exists.
    ///
    /// In-memory databases live inside a single connection, so their pool is pinned to
    /// exactly one connection that never expires; writers then queue on the pool.
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Configuration(format!("Invalid database url {}: {}", url, e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(8))
            .connect_with(options)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize().await?;

        info!(url, in_memory, "Engagement database ready");
        Ok(db)
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn initialize(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to initialize schema: {}", e)))?;
        }
        Ok(())
    }

    /// Start a write transaction.
    ///
    /// The first statement bumps the write gate, so the transaction holds SQLite's write
    /// lock before it reads anything. Concurrent writers queue on the busy timeout instead
    /// of failing a read-to-write upgrade halfway through.
    pub async fn begin(&self) -> AppResult<StoreTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to begin transaction: {}", e)))?;
        sqlx::query("UPDATE write_gate SET seq = seq + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to acquire write lock: {}", e)))?;
        Ok(StoreTransaction { tx })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_leaves_no_rows() {
        let db = SqliteDatabase::new_in_memory().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        sqlx::query("INSERT INTO likes (entity_id, user_id, tenant_id, created_at) VALUES (1, 2, 3, 4)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM likes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 0);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("engagement.db").display());

        let db = SqliteDatabase::connect(&url, 4).await.unwrap();
        sqlx::query("INSERT INTO likes (entity_id, user_id, tenant_id, created_at) VALUES (1, 2, 3, 4)")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let reopened = SqliteDatabase::connect(&url, 4).await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM likes")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }
}
