//! Core domain types for queued transactions, nonces, and webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued transaction.
///
/// Transitions are forward-only: `Queued → Processed → {Submitted,
/// UserOpSent, Errored}`, `Submitted → {Mined, Retried, Errored}`.
/// `Cancelled` is written by an external actor before a cycle locks the
/// row; the engine never writes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Waiting to be picked up by a dispatch cycle
    #[default]
    Queued,
    /// Locked by a cycle, send attempt pending
    Processed,
    /// Accepted by the network, awaiting confirmation
    Submitted,
    /// Forwarded to the user-operation relay
    UserOpSent,
    /// Confirmed on chain (written by the confirmation watcher)
    Mined,
    /// Resubmitted with adjusted parameters (written externally)
    Retried,
    /// Terminal failure
    Errored,
    /// Cancelled by the producer before dispatch
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processed => "processed",
            Self::Submitted => "submitted",
            Self::UserOpSent => "user_op_sent",
            Self::Mined => "mined",
            Self::Retried => "retried",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a status to the webhook event kind it notifies.
    ///
    /// Total over the status set; cancellation reuses the errored kind
    /// deliberately (there is no dedicated cancelled subscription).
    pub fn event_kind(&self) -> WebhookEventKind {
        match self {
            Self::Queued | Self::Processed => WebhookEventKind::QueuedTransaction,
            Self::Submitted | Self::UserOpSent => WebhookEventKind::SentTransaction,
            Self::Retried => WebhookEventKind::RetriedTransaction,
            Self::Mined => WebhookEventKind::MinedTransaction,
            Self::Errored | Self::Cancelled => WebhookEventKind::ErroredTransaction,
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processed" => Ok(Self::Processed),
            "submitted" => Ok(Self::Submitted),
            "user_op_sent" => Ok(Self::UserOpSent),
            "mined" => Ok(Self::Mined),
            "retried" => Ok(Self::Retried),
            "errored" => Ok(Self::Errored),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the transfer value is resolved at send time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Use the stored value verbatim
    #[default]
    Standard,
    /// Compute the value from the live wallet balance minus worst-case fees
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "withdrawal" => Ok(Self::Withdrawal),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

/// One unit of dispatch work, owned by the queue store.
///
/// A row with both `account_address` and `signer_address` set is
/// user-operation work routed through the relay; everything else is
/// signed locally and broadcast directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTransaction {
    /// Unique identifier (UUID)
    pub queue_id: String,
    /// Target chain id
    pub chain_id: i64,
    /// Sender wallet address (plain transactions)
    pub from_address: Option<String>,
    /// Destination address
    pub to_address: Option<String>,
    /// Smart account address (user operations)
    pub account_address: Option<String>,
    /// Signer behind the smart account (user operations)
    pub signer_address: Option<String>,
    /// Transfer value in wei, decimal string
    pub value: Option<String>,
    /// Call data, 0x-prefixed hex
    pub data: Option<String>,
    /// Value resolution kind
    pub kind: TransactionKind,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// Assigned nonce; null until a send is attempted
    pub nonce: Option<i64>,
    /// Network transaction hash once accepted
    pub transaction_hash: Option<String>,
    /// Relay-assigned operation hash (user operations)
    pub user_op_hash: Option<String>,
    /// Last error message
    pub error_message: Option<String>,
    /// When the send was accepted
    pub sent_at: Option<DateTime<Utc>>,
    /// Block height observed at send time
    pub sent_at_block: Option<i64>,
    /// Set by the producer to withdraw the row before dispatch
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl QueuedTransaction {
    /// Whether this row is user-operation work for the relay path.
    #[must_use]
    pub fn is_user_operation(&self) -> bool {
        self.account_address.is_some() && self.signer_address.is_some()
    }
}

/// Partial update applied to a queued transaction by id.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub status: Option<TransactionStatus>,
    pub nonce: Option<i64>,
    pub transaction_hash: Option<String>,
    pub user_op_hash: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_at_block: Option<i64>,
}

impl TransactionUpdate {
    #[must_use]
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            status: Some(TransactionStatus::Errored),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Fee parameters fetched fresh per group before sending
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeEstimate {
    /// Max fee per gas unit, wei
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas unit, wei
    pub max_priority_fee_per_gas: u128,
    /// Estimated gas limit for the transfer
    pub gas_limit: u64,
}

/// Fully populated transaction ready for signing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransaction {
    pub chain_id: i64,
    pub from: String,
    pub to: String,
    /// Wei, decimal string (u128 values exceed JSON number range)
    pub value: String,
    pub data: String,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

/// Classified result of a raw-transaction broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The network accepted the transaction
    Accepted { transaction_hash: String },
    /// The supplied nonce was already consumed; retry with the next one
    StaleNonce { message: String },
    /// Terminal rejection; do not retry
    Rejected { message: String },
}

/// On-chain detail resolved after an accepted send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationDetail {
    pub transaction_hash: String,
    pub block_number: i64,
}

/// Unsigned user operation for the relay path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: String,
    pub target: String,
    pub data: String,
    pub value: Option<String>,
    /// Relay-space nonce drawn from a collision-resistant random source
    pub nonce: String,
}

/// User operation with signature, ready for the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedUserOperation {
    #[serde(flatten)]
    pub operation: UserOperation,
    pub signature: String,
}

/// Webhook event kinds subscribers can register for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    /// Catch-all: every transaction status change
    AllTransactions,
    QueuedTransaction,
    SentTransaction,
    RetriedTransaction,
    MinedTransaction,
    ErroredTransaction,
    /// Low wallet balance alert
    WalletBalance,
}

impl WebhookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllTransactions => "all_transactions",
            Self::QueuedTransaction => "queued_transaction",
            Self::SentTransaction => "sent_transaction",
            Self::RetriedTransaction => "retried_transaction",
            Self::MinedTransaction => "mined_transaction",
            Self::ErroredTransaction => "errored_transaction",
            Self::WalletBalance => "wallet_balance",
        }
    }
}

impl std::str::FromStr for WebhookEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_transactions" => Ok(Self::AllTransactions),
            "queued_transaction" => Ok(Self::QueuedTransaction),
            "sent_transaction" => Ok(Self::SentTransaction),
            "retried_transaction" => Ok(Self::RetriedTransaction),
            "mined_transaction" => Ok(Self::MinedTransaction),
            "errored_transaction" => Ok(Self::ErroredTransaction),
            "wallet_balance" => Ok(Self::WalletBalance),
            _ => Err(format!("Invalid webhook event kind: {}", s)),
        }
    }
}

impl std::fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registered webhook endpoint; managed externally, read-only here
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookSubscription {
    pub event_kind: WebhookEventKind,
    pub url: String,
    pub secret: Option<String>,
    pub active: bool,
}

/// Payload delivered when a wallet balance drops below the minimum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAlert {
    pub wallet_address: String,
    pub chain_id: i64,
    /// Current balance in wei, decimal string
    pub current_balance: String,
    /// Configured minimum in wei, decimal string
    pub minimum_balance: String,
    pub message: String,
}

/// Store-backed runtime settings consulted once per cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Cycles holding fewer rows than this abort with no side effects
    pub min_txs_to_process: i64,
    /// Balance threshold for the low-balance alert, wei decimal string
    pub min_wallet_balance: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_txs_to_process: 1,
            min_wallet_balance: "20000000000000000".to_string(),
        }
    }
}

/// Result of one dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fewer rows than the configured minimum; nothing was touched
    Skipped { available: usize },
    /// Cycle committed; counts of rows by disposition
    Completed {
        submitted: usize,
        user_ops_sent: usize,
        errored: usize,
        cancelled: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transaction_status_display_and_parsing() {
        let statuses = vec![
            (TransactionStatus::Queued, "queued"),
            (TransactionStatus::Processed, "processed"),
            (TransactionStatus::Submitted, "submitted"),
            (TransactionStatus::UserOpSent, "user_op_sent"),
            (TransactionStatus::Mined, "mined"),
            (TransactionStatus::Retried, "retried"),
            (TransactionStatus::Errored, "errored"),
            (TransactionStatus::Cancelled, "cancelled"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(TransactionStatus::from_str(string).unwrap(), status);
        }

        assert!(TransactionStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_status_event_mapping_is_total() {
        assert_eq!(
            TransactionStatus::Queued.event_kind(),
            WebhookEventKind::QueuedTransaction
        );
        assert_eq!(
            TransactionStatus::Submitted.event_kind(),
            WebhookEventKind::SentTransaction
        );
        assert_eq!(
            TransactionStatus::UserOpSent.event_kind(),
            WebhookEventKind::SentTransaction
        );
        assert_eq!(
            TransactionStatus::Retried.event_kind(),
            WebhookEventKind::RetriedTransaction
        );
        assert_eq!(
            TransactionStatus::Mined.event_kind(),
            WebhookEventKind::MinedTransaction
        );
        assert_eq!(
            TransactionStatus::Errored.event_kind(),
            WebhookEventKind::ErroredTransaction
        );
        // Cancellation folds into errored on purpose.
        assert_eq!(
            TransactionStatus::Cancelled.event_kind(),
            WebhookEventKind::ErroredTransaction
        );
    }

    #[test]
    fn test_user_operation_detection() {
        let mut tx = sample_transaction();
        assert!(!tx.is_user_operation());

        tx.account_address = Some("0xaccount".to_string());
        assert!(!tx.is_user_operation());

        tx.signer_address = Some("0xsigner".to_string());
        assert!(tx.is_user_operation());
    }

    #[test]
    fn test_transaction_update_errored_sets_message() {
        let update = TransactionUpdate::errored("out of gas");
        assert_eq!(update.status, Some(TransactionStatus::Errored));
        assert_eq!(update.error_message.as_deref(), Some("out of gas"));
        assert!(update.transaction_hash.is_none());
    }

    #[test]
    fn test_queued_transaction_serialization_roundtrip() {
        let tx = sample_transaction();
        let json = serde_json::to_string(&tx).unwrap();
        let deserialized: QueuedTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, tx);
    }

    fn sample_transaction() -> QueuedTransaction {
        let now = Utc::now();
        QueuedTransaction {
            queue_id: "q1".to_string(),
            chain_id: 1,
            from_address: Some("0xfrom".to_string()),
            to_address: Some("0xto".to_string()),
            account_address: None,
            signer_address: None,
            value: Some("1000".to_string()),
            data: Some("0x".to_string()),
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
}
