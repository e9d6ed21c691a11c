//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, DispatchError, NetworkError, WebhookError,
};
pub use traits::{
    CycleStore, NetworkClient, Networks, QueueStore, RelayClient, SubscriptionStore,
    TransactionSigner,
};
pub use types::{
    BalanceAlert, BroadcastOutcome, ConfirmationDetail, CycleOutcome, EngineSettings, FeeEstimate,
    PreparedTransaction, QueuedTransaction, SignedUserOperation, TransactionKind,
    TransactionStatus, TransactionUpdate, UserOperation, WebhookEventKind, WebhookSubscription,
};
