use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        // Each `:memory:` connection is its own isolated database, so a
        // pool of more than one would silently fork state across queries.
        // Cap to a single connection for in-memory URLs (tests only; real
        // deployments use a file path and keep the full pool).
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Alerts table, one row per `Alert` (§3). Conditions/options are
        // stored as JSON blobs since they're sum-typed / exchange-specific.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                alert_type TEXT NOT NULL,
                exchange TEXT NOT NULL,
                market TEXT NOT NULL,
                symbols_json TEXT NOT NULL,
                target_value REAL,
                condition TEXT,
                initial_price REAL,
                conditions_json TEXT,
                notification_options_json TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                triggered BOOLEAN NOT NULL DEFAULT 0,
                triggered_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alerts table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_active_type
            ON alerts (is_active, alert_type);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alerts index")?;

        // Migration: older rows predating a field addition keep working via
        // best-effort ALTER TABLE, same pattern as upstream.
        let _ = sqlx::query("ALTER TABLE alerts ADD COLUMN notification_options_json TEXT")
            .execute(&mut *conn)
            .await;

        // 2. Lease table backing the Lease Coordinator (§4.I, §5). `name` is
        // the lock key; every mutation is a conditional UPDATE predicated on
        // `owner_id`/`expires_at` — the WHERE clause is the lock, there is no
        // separate mutex.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_lease (
                name TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                renewed_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                meta TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create engine_lease table")?;

        // 3. Users table: read-only from the core (§6 `User(...,
        // telegramChatId?)`). Account creation/linking is an external
        // collaborator; the engine only ever selects from this table.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                telegram_chat_id TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create users table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
