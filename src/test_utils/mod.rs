//! Shared test helpers and mock implementations.

pub mod mocks;

pub use mocks::{
    MockConfig, MockCycleStore, MockNetworkClient, MockNetworks, MockQueueStore, MockRelayClient,
    MockSigner, MockSubscriptionStore,
};

use chrono::Utc;

use crate::domain::{QueuedTransaction, TransactionKind, TransactionStatus};

/// A queued plain transaction with sensible defaults
#[must_use]
pub fn queued_transaction(queue_id: &str, from_address: &str, chain_id: i64) -> QueuedTransaction {
    let now = Utc::now();
    QueuedTransaction {
        queue_id: queue_id.to_string(),
        chain_id,
        from_address: Some(from_address.to_string()),
        to_address: Some("0x000000000000000000000000000000000000dead".to_string()),
        account_address: None,
        signer_address: None,
        value: Some("1000".to_string()),
        data: None,
        kind: TransactionKind::Standard,
        status: TransactionStatus::Queued,
        nonce: None,
        transaction_hash: None,
        user_op_hash: None,
        error_message: None,
        sent_at: None,
        sent_at_block: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// A queued smart-account user operation with sensible defaults
#[must_use]
pub fn queued_user_operation(queue_id: &str, chain_id: i64) -> QueuedTransaction {
    let mut row = queued_transaction(queue_id, "0xbackend", chain_id);
    row.from_address = None;
    row.account_address = Some("0x00000000000000000000000000000000000acc7".to_string());
    row.signer_address = Some("0x0000000000000000000000000000000000051637".to_string());
    row
}
