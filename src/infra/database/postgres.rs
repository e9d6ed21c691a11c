//! PostgreSQL store implementations.
//!
//! A dispatch cycle maps to one database transaction: `lock_queued` uses
//! `FOR UPDATE SKIP LOCKED` so concurrent cycles never hold the same row,
//! and the wallet nonce row is locked with `FOR UPDATE` so nonce
//! allocation for an (address, chain) pair is serialized across cycles.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, CycleStore, DatabaseError, EngineSettings, QueueStore, QueuedTransaction,
    SubscriptionStore, TransactionKind, TransactionStatus, TransactionUpdate, WebhookEventKind,
    WebhookSubscription,
};

const TRANSACTION_COLUMNS: &str = r#"
    queue_id, chain_id, from_address, to_address, account_address, signer_address,
    value, data, kind, status, nonce, transaction_hash, user_op_hash, error_message,
    sent_at, sent_at_block, cancelled_at, created_at, updated_at
"#;

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL queue store with connection pooling
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Create a new store with custom pool configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new store with default pool configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Parse a database row into a QueuedTransaction
fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<QueuedTransaction, AppError> {
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");

    Ok(QueuedTransaction {
        queue_id: row.get("queue_id"),
        chain_id: row.get("chain_id"),
        from_address: row.get("from_address"),
        to_address: row.get("to_address"),
        account_address: row.get("account_address"),
        signer_address: row.get("signer_address"),
        value: row.get("value"),
        data: row.get("data"),
        kind: TransactionKind::from_str(&kind_str).unwrap_or_default(),
        status: TransactionStatus::from_str(&status_str).unwrap_or_default(),
        nonce: row.get("nonce"),
        transaction_hash: row.get("transaction_hash"),
        user_op_hash: row.get("user_op_hash"),
        error_message: row.get("error_message"),
        sent_at: row.get("sent_at"),
        sent_at_block: row.get("sent_at_block"),
        cancelled_at: row.get("cancelled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    async fn begin_cycle(&self) -> Result<Box<dyn CycleStore>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(Box::new(PostgresCycleStore { tx }))
    }

    #[instrument(skip(self, queue_ids), fields(count = queue_ids.len()))]
    async fn load_transactions(
        &self,
        queue_ids: &[String],
    ) -> Result<Vec<QueuedTransaction>, AppError> {
        if queue_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE queue_id = ANY($1)"
        ))
        .bind(queue_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(row_to_transaction).collect()
    }
}

/// One open dispatch-cycle transaction over Postgres
pub struct PostgresCycleStore {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CycleStore for PostgresCycleStore {
    #[instrument(skip(self))]
    async fn lock_queued(&mut self, limit: i64) -> Result<Vec<QueuedTransaction>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(row_to_transaction).collect()
    }

    #[instrument(skip(self, update))]
    async fn update_transaction(
        &mut self,
        queue_id: &str,
        update: TransactionUpdate,
    ) -> Result<(), AppError> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = COALESCE($1, status),
                nonce = COALESCE($2, nonce),
                transaction_hash = COALESCE($3, transaction_hash),
                user_op_hash = COALESCE($4, user_op_hash),
                error_message = COALESCE($5, error_message),
                sent_at = COALESCE($6, sent_at),
                sent_at_block = COALESCE($7, sent_at_block),
                updated_at = $8
            WHERE queue_id = $9
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.nonce)
        .bind(update.transaction_hash)
        .bind(update.user_op_hash)
        .bind(update.error_message)
        .bind(update.sent_at)
        .bind(update.sent_at_block)
        .bind(now)
        .bind(queue_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn wallet_nonce(
        &mut self,
        address: &str,
        chain_id: i64,
    ) -> Result<Option<u64>, AppError> {
        // Create the row on first touch so the FOR UPDATE below always has
        // something to lock; that lock is what serializes nonce allocation
        // for this (address, chain) pair across concurrent cycles.
        sqlx::query(
            r#"
            INSERT INTO wallet_nonces (address, chain_id, nonce)
            VALUES ($1, $2, 0)
            ON CONFLICT (address, chain_id) DO NOTHING
            "#,
        )
        .bind(address)
        .bind(chain_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let row = sqlx::query(
            "SELECT nonce FROM wallet_nonces WHERE address = $1 AND chain_id = $2 FOR UPDATE",
        )
        .bind(address)
        .bind(chain_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let nonce: i64 = row.get("nonce");
        Ok(Some(nonce as u64))
    }

    #[instrument(skip(self))]
    async fn set_wallet_nonce(
        &mut self,
        address: &str,
        chain_id: i64,
        nonce: u64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_nonces (address, chain_id, nonce, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (address, chain_id) DO UPDATE SET
                nonce = GREATEST(wallet_nonces.nonce, EXCLUDED.nonce),
                updated_at = NOW()
            "#,
        )
        .bind(address)
        .bind(chain_id)
        .bind(nonce as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn engine_settings(&mut self) -> Result<EngineSettings, AppError> {
        let row = sqlx::query(
            "SELECT min_txs_to_process, min_wallet_balance FROM engine_configuration WHERE id = 1",
        )
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(EngineSettings {
                min_txs_to_process: row.get("min_txs_to_process"),
                min_wallet_balance: row.get("min_wallet_balance"),
            }),
            None => Ok(EngineSettings::default()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))
    }
}

/// PostgreSQL webhook subscription store
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    #[instrument(skip(self))]
    async fn all_subscriptions(&self) -> Result<Vec<WebhookSubscription>, AppError> {
        let rows = sqlx::query(
            "SELECT event_kind, url, secret, active FROM webhook_subscriptions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_str: String = row.get("event_kind");
            let Ok(event_kind) = WebhookEventKind::from_str(&kind_str) else {
                // Unknown kinds are ignored rather than failing the load.
                continue;
            };
            subscriptions.push(WebhookSubscription {
                event_kind,
                url: row.get("url"),
                secret: row.get("secret"),
                active: row.get("active"),
            });
        }
        Ok(subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }
}
