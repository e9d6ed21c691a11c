//! Error definitions for the dispatch engine.
//!
//! Each boundary has its own closed taxonomy so callers can match
//! exhaustively instead of probing error strings.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// RPC transport and protocol errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("RPC returned error: {0}")]
    Rpc(String),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("No client registered for chain {0}")]
    UnknownChain(i64),
}

/// Faults raised while driving a dispatch cycle.
///
/// This is the closed set matched at the row, group, and cycle
/// boundaries; nothing in the send path surfaces an untyped error.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Nonce {nonce} is stale on chain")]
    StaleNonce { nonce: u64 },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Could not resolve transfer value: {0}")]
    ValueResolutionFailure(String),

    #[error("Dispatch cycle exceeded its deadline")]
    CycleTimeout,
}

/// Outbound notification errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Subscription store unavailable: {0}")]
    SubscriptionLoad(String),
}

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}
