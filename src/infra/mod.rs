//! Infrastructure layer implementations.

pub mod database;
pub mod network;
pub mod webhook;

pub use database::{PostgresConfig, PostgresQueueStore, PostgresSubscriptionStore};
pub use network::{HttpRelayClient, HttpSignerClient, JsonRpcNetworkClient, RpcClientConfig, StaticNetworks};
pub use webhook::{AlertThrottle, SubscriptionCache, WebhookNotifier, generate_signature};
