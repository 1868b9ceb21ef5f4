//! PostgreSQL document store for snapshot history.
//!
//! Each engine instance owns one collection (a table). Every document is one
//! batch: `{id, batch_type, users (JSONB), fingerprint, created_at}`. Inserts
//! append, so history is kept.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `GRAPH_DATABASE`: Database name, overrides the one in the URL
//! - `GRAPH_COLLECTION`: Table name (default: `users_batches`)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 4)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 0)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ensure_valid, SnapshotStore, StoreError};
use crate::config::{is_valid_collection_name, DEFAULT_COLLECTION};
use crate::types::{BatchType, User, UsersBatch};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the document store and its connection pool.
///
/// A CLI run issues a handful of sequential queries, so the pool stays small
/// and keeps no idle connections.
#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    /// Database connection URL.
    pub url: String,
    /// Database name; empty keeps the one from the URL.
    pub database: String,
    /// Table holding this instance's documents.
    pub collection: String,
    /// Maximum connections in pool (default: 4).
    pub max_connections: u32,
    /// Minimum idle connections (default: 0).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800).
    pub max_lifetime_secs: u64,
}

impl DocumentStoreConfig {
    /// Create a config with pool defaults.
    pub fn new(url: impl Into<String>, database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            collection: collection.into(),
            max_connections: 4,
            min_connections: 0,
            connect_timeout_secs: 10,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        }
    }

    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/graph".to_string()),
            database: std::env::var("GRAPH_DATABASE").unwrap_or_default(),
            collection: std::env::var("GRAPH_COLLECTION")
                .unwrap_or_else(|_| DEFAULT_COLLECTION.to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 4),
            min_connections: env_or("DB_MIN_CONNECTIONS", 0),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL-backed document store.
pub struct PostgresSnapshotStore {
    pool: PgPool,
    collection: String,
}

impl PostgresSnapshotStore {
    /// Connect and make sure the collection exists.
    pub async fn new(config: DocumentStoreConfig) -> Result<Self, StoreError> {
        if !is_valid_collection_name(&config.collection) {
            return Err(StoreError::Config(format!(
                "collection name {:?} is not a valid identifier",
                config.collection
            )));
        }

        tracing::info!(
            collection = %config.collection,
            max_connections = config.max_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing document store"
        );

        let mut options = PgConnectOptions::from_str(&config.url)?;
        if !config.database.is_empty() {
            options = options.database(&config.database);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            collection: config.collection,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(DocumentStoreConfig::from_env()).await
    }

    /// Collection (table) name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    /// Drop the whole collection. Used by tests to reset state.
    pub async fn drop_collection(&self) -> Result<(), StoreError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.collection))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {c} (
                id UUID PRIMARY KEY,
                batch_type TEXT NOT NULL,
                users JSONB NOT NULL,
                fingerprint TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            c = self.collection
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {c}_type_created_idx ON {c} (batch_type, created_at DESC)",
            c = self.collection
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn parse_batch_row(row: &PgRow) -> Result<UsersBatch, StoreError> {
        let type_str: String = row.try_get("batch_type")?;
        let batch_type = BatchType::from_str(&type_str)
            .filter(BatchType::is_valid)
            .ok_or(StoreError::InvalidBatchType(type_str))?;
        let Json(users): Json<Vec<User>> = row.try_get("users")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(UsersBatch::with_created_at(batch_type, users, created_at))
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    fn keeps_history(&self) -> bool {
        true
    }

    async fn insert(&self, batch: &UsersBatch, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_valid(batch.batch_type)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let id = Uuid::new_v4();
        let fingerprint = batch.fingerprint();
        let sql = format!(
            "INSERT INTO {} (id, batch_type, users, fingerprint, created_at) VALUES ($1, $2, $3, $4, $5)",
            self.collection
        );

        let write = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&sql)
                .bind(id)
                .bind(batch.batch_type.as_str())
                .bind(Json(&batch.users))
                .bind(&fingerprint)
                .bind(batch.created_at)
                .execute(&mut *tx)
                .await?;
            Ok::<_, sqlx::Error>(tx)
        };

        // Dropping an uncommitted transaction rolls it back.
        let tx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            tx = write => tx?,
        };
        if cancel.is_cancelled() {
            tx.rollback().await?;
            return Err(StoreError::Cancelled);
        }
        tx.commit().await?;

        tracing::debug!(
            document_id = %id,
            batch_type = %batch.batch_type,
            users = batch.len(),
            fingerprint = %fingerprint,
            "batch document inserted"
        );
        Ok(())
    }

    async fn latest_by_type(&self, batch_type: BatchType) -> Result<Option<UsersBatch>, StoreError> {
        ensure_valid(batch_type)?;
        let row = sqlx::query(&format!(
            r#"
            SELECT batch_type, users, created_at
            FROM {}
            WHERE batch_type = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            self.collection
        ))
        .bind(batch_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_batch_row).transpose()
    }

    async fn all_by_type(&self, batch_type: BatchType) -> Result<Vec<UsersBatch>, StoreError> {
        ensure_valid(batch_type)?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT batch_type, users, created_at
            FROM {}
            WHERE batch_type = $1
            ORDER BY created_at DESC
            "#,
            self.collection
        ))
        .bind(batch_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_batch_row).collect()
    }
}
