// Database - SQLite pool, transactions and the install migration
// Every public mutation runs inside exactly one DatabaseTransaction

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub const FIELDS_TABLE: &str = "rating_fields";
pub const COLLECTIONS_TABLE: &str = "rating_collections";
pub const COLLECTION_FIELDS_TABLE: &str = "rating_collection_fields";
pub const RATINGS_TABLE: &str = "ratings";
pub const SETTINGS_TABLE: &str = "rating_settings";

/// Transaction wrapper for database operations
pub struct DatabaseTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl DatabaseTransaction {
    pub fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    /// Connection every statement of this transaction must go through
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the transaction
    pub async fn commit(self) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to rollback transaction: {}", e)))
    }

    /// Commit on `Ok`, roll back on `Err`, handing the original result back.
    pub async fn finish<T>(self, result: AppResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed operation also failed");
                }
                Err(err)
            }
        }
    }
}

/// SQLite-backed store for fields, collections, ratings and settings
#[derive(Clone)]
pub struct RatingDatabase {
    pool: SqlitePool,
}

impl RatingDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for the configured URL.
    /// In-memory stores keep exactly one connection alive for the lifetime of the pool,
    /// otherwise the schema would vanish with a recycled connection.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database.url)
            .map_err(|e| {
                AppError::ConfigurationError(format!(
                    "Invalid database url {}: {}",
                    config.database.url, e
                ))
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.database.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            AppError::DatabaseError(format!(
                "Failed to connect to {}: {}",
                config.database.url, e
            ))
        })?;

        info!(url = %config.database.url, "connected to rating store");
        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        let db = Self::connect(&Config::in_memory()).await?;
        db.install().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin_transaction(&self) -> AppResult<DatabaseTransaction> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(DatabaseTransaction::new(tx))
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    /// Create the normalized tables. Safe to run against an existing store.
    pub async fn install(&self) -> AppResult<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {FIELDS_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    handle TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    min_value REAL NOT NULL,
                    max_value REAL NOT NULL,
                    increment REAL NOT NULL,
                    decimal_precision INTEGER NOT NULL DEFAULT 0,
                    date_created INTEGER NOT NULL,
                    date_updated INTEGER NOT NULL
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {COLLECTIONS_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    handle TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    element_type TEXT NOT NULL,
                    field_layout_id INTEGER,
                    date_created INTEGER NOT NULL,
                    date_updated INTEGER NOT NULL
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {COLLECTION_FIELDS_TABLE} (
                    collection_id INTEGER NOT NULL REFERENCES {COLLECTIONS_TABLE}(id) ON DELETE CASCADE,
                    field_id INTEGER NOT NULL REFERENCES {FIELDS_TABLE}(id) ON DELETE CASCADE,
                    required INTEGER NOT NULL DEFAULT 0,
                    sort_order INTEGER
                )
                "#
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{COLLECTION_FIELDS_TABLE}_pair ON {COLLECTION_FIELDS_TABLE}(collection_id, field_id)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{COLLECTION_FIELDS_TABLE}_field ON {COLLECTION_FIELDS_TABLE}(field_id)"
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {RATINGS_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection_id INTEGER NOT NULL REFERENCES {COLLECTIONS_TABLE}(id) ON DELETE CASCADE,
                    element_id INTEGER NOT NULL,
                    owner_id INTEGER,
                    name TEXT,
                    email TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    date_created INTEGER NOT NULL,
                    date_updated INTEGER NOT NULL
                )
                "#
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{RATINGS_TABLE}_collection ON {RATINGS_TABLE}(collection_id)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{RATINGS_TABLE}_element ON {RATINGS_TABLE}(element_id)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{RATINGS_TABLE}_owner ON {RATINGS_TABLE}(owner_id)"
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#
            ),
        ];

        let mut tx = self.begin_transaction().await?;
        for statement in &statements {
            sqlx::query(statement)
                .execute(tx.conn())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to install schema: {}", e)))?;
        }
        tx.commit().await?;

        debug!("rating schema installed");
        Ok(())
    }
}
