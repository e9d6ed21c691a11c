//! Static chain-id to RPC client registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::{AppError, NetworkClient, NetworkError, Networks};

use super::rpc::{JsonRpcNetworkClient, RpcClientConfig};

/// Fixed map of chain id to network client, built once at startup.
pub struct StaticNetworks {
    clients: HashMap<i64, Arc<dyn NetworkClient>>,
}

impl StaticNetworks {
    #[must_use]
    pub fn new(clients: HashMap<i64, Arc<dyn NetworkClient>>) -> Self {
        Self { clients }
    }

    /// Build JSON-RPC clients from a (chain id, url) list.
    pub fn from_rpc_urls<I>(urls: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        let mut clients: HashMap<i64, Arc<dyn NetworkClient>> = HashMap::new();
        for (chain_id, url) in urls {
            let client = JsonRpcNetworkClient::new(RpcClientConfig::new(&url))?;
            info!(chain_id, url = %url, "Registered network client");
            clients.insert(chain_id, Arc::new(client));
        }
        Ok(Self { clients })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Networks for StaticNetworks {
    fn network(&self, chain_id: i64) -> Result<Arc<dyn NetworkClient>, AppError> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or(AppError::Network(NetworkError::UnknownChain(chain_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_chain_is_an_error() {
        let networks = StaticNetworks::new(HashMap::new());
        let Err(err) = networks.network(1) else {
            panic!("expected an unknown-chain error");
        };
        assert!(matches!(
            err,
            AppError::Network(NetworkError::UnknownChain(1))
        ));
    }

    #[test]
    fn test_from_rpc_urls_registers_clients() {
        let networks = StaticNetworks::from_rpc_urls(vec![
            (1, "http://localhost:8545".to_string()),
            (137, "http://localhost:8546".to_string()),
        ])
        .unwrap();
        assert_eq!(networks.len(), 2);
        assert!(networks.network(137).is_ok());
    }
}
