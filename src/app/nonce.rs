//! Nonce coordination for an (account, chain) pair.
//!
//! The starting nonce for a group is the maximum of the persisted record
//! and the network's pending view. Reading the persisted record locks it
//! for the rest of the cycle transaction, which is what serializes nonce
//! allocation across concurrent cycles touching the same pair.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::{AppError, NetworkClient};

use super::dispatcher::SharedCycleStore;

/// Resolves and finalizes nonces for one dispatch group
pub struct NonceCoordinator<'a> {
    store: &'a SharedCycleStore,
    network: Arc<dyn NetworkClient>,
}

impl<'a> NonceCoordinator<'a> {
    #[must_use]
    pub fn new(store: &'a SharedCycleStore, network: Arc<dyn NetworkClient>) -> Self {
        Self { store, network }
    }

    /// Resolve the starting nonce for the group.
    ///
    /// If the network has observed sends the engine did not make, the
    /// pending nonce runs ahead of the record; the reconciled value is
    /// written back immediately so it survives even if the group errors.
    #[instrument(skip(self))]
    pub async fn resolve_start(&self, address: &str, chain_id: i64) -> Result<u64, AppError> {
        let persisted = {
            let mut store = self.store.lock().await;
            store.wallet_nonce(address, chain_id).await?
        };
        if persisted.is_none() {
            warn!(address = %address, chain_id, "No persisted nonce for wallet, starting from network view");
        }
        let persisted = persisted.unwrap_or(0);

        let pending = self.network.pending_nonce(address).await?;

        if pending > persisted {
            info!(
                address = %address,
                chain_id,
                persisted,
                pending,
                "Network nonce ahead of record, reconciling"
            );
            let mut store = self.store.lock().await;
            store.set_wallet_nonce(address, chain_id, pending).await?;
            Ok(pending)
        } else {
            Ok(persisted)
        }
    }

    /// Persist `start + consumed` after the group drain, regardless of
    /// individual row outcomes, so no consumed nonce is ever reissued.
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        address: &str,
        chain_id: i64,
        next_nonce: u64,
    ) -> Result<(), AppError> {
        let mut store = self.store.lock().await;
        store.set_wallet_nonce(address, chain_id, next_nonce).await
    }
}
