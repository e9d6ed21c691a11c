//! Network infrastructure: JSON-RPC clients, signer, and relay.

pub mod registry;
pub mod relay;
pub mod rpc;
pub mod signer;

pub use registry::StaticNetworks;
pub use relay::HttpRelayClient;
pub use rpc::{JsonRpcNetworkClient, RpcClientConfig};
pub use signer::HttpSignerClient;
