//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::error::AppError;
use super::types::{
    BroadcastOutcome, ConfirmationDetail, EngineSettings, FeeEstimate, PreparedTransaction,
    QueuedTransaction, SignedUserOperation, TransactionUpdate, UserOperation, WebhookSubscription,
};
use std::sync::Arc;

/// Queue store trait for persistence of dispatch work
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Check store connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Open one atomic, exclusive-row-acquiring unit of work.
    ///
    /// All reads and writes performed through the returned handle either
    /// commit together or are discarded when the handle is dropped.
    async fn begin_cycle(&self) -> Result<Box<dyn CycleStore>, AppError>;

    /// Load current records by id, outside any cycle transaction.
    /// Used for post-commit webhook notification.
    async fn load_transactions(&self, queue_ids: &[String])
    -> Result<Vec<QueuedTransaction>, AppError>;
}

/// One open dispatch-cycle transaction.
///
/// Rows selected by `lock_queued` stay exclusively held until commit or
/// drop; a dropped handle rolls everything back and releases the locks.
#[async_trait]
pub trait CycleStore: Send {
    /// Select and lock up to `limit` queued rows, oldest first, skipping
    /// rows already held by a concurrent cycle.
    async fn lock_queued(&mut self, limit: i64) -> Result<Vec<QueuedTransaction>, AppError>;

    /// Apply a partial update to a row by id.
    async fn update_transaction(
        &mut self,
        queue_id: &str,
        update: TransactionUpdate,
    ) -> Result<(), AppError>;

    /// Read the persisted next nonce for (address, chain), if any.
    async fn wallet_nonce(&mut self, address: &str, chain_id: i64)
    -> Result<Option<u64>, AppError>;

    /// Persist the next nonce for (address, chain).
    async fn set_wallet_nonce(
        &mut self,
        address: &str,
        chain_id: i64,
        nonce: u64,
    ) -> Result<(), AppError>;

    /// Read the engine runtime settings.
    async fn engine_settings(&mut self) -> Result<EngineSettings, AppError>;

    /// Commit the cycle, releasing all row locks.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Resolves a network client per chain id
pub trait Networks: Send + Sync {
    fn network(&self, chain_id: i64) -> Result<Arc<dyn NetworkClient>, AppError>;
}

/// Network client trait for chain operations
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Pending-inclusion nonce for an account (mempool view)
    async fn pending_nonce(&self, address: &str) -> Result<u64, AppError>;

    /// Native balance in wei
    async fn balance(&self, address: &str) -> Result<u128, AppError>;

    /// Fresh fee estimate for the network
    async fn fee_estimate(&self) -> Result<FeeEstimate, AppError>;

    /// Broadcast a signed raw transaction and classify the response.
    async fn send_raw_transaction(&self, signed_payload: &str)
    -> Result<BroadcastOutcome, AppError>;

    /// Look up confirmation detail for an accepted send.
    async fn transaction_confirmation(
        &self,
        transaction_hash: &str,
    ) -> Result<Option<ConfirmationDetail>, AppError>;

    /// Current block height
    async fn block_number(&self) -> Result<i64, AppError>;
}

/// Signing trait; key custody lives behind this seam
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign a populated transaction, returning the raw signed payload as
    /// 0x-prefixed hex ready for broadcast.
    async fn sign_transaction(&self, tx: &PreparedTransaction) -> Result<String, AppError>;

    /// Sign a user operation on behalf of (account, signer).
    async fn sign_user_operation(
        &self,
        signer_address: &str,
        operation: &UserOperation,
    ) -> Result<SignedUserOperation, AppError>;
}

/// Relay (bundler) client for user operations
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Forward a signed user operation to the relay endpoint.
    async fn send_user_operation(&self, operation: &SignedUserOperation) -> Result<(), AppError>;
}

/// Webhook subscription store; externally managed, read-only here
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load the full subscription table.
    async fn all_subscriptions(&self) -> Result<Vec<WebhookSubscription>, AppError>;
}
