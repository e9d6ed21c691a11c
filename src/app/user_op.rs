//! Smart-account user-operation submission path.
//!
//! User operations carry their own randomized nonce space, so rows here
//! skip the wallet nonce ledger entirely and go straight to the relay.

use std::sync::Arc;
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, DispatchError, QueuedTransaction, RelayClient, TransactionSigner, TransactionStatus,
    TransactionUpdate, UserOperation,
};

use super::dispatcher::CycleContext;

/// Sends smart-account rows through the bundler relay
pub struct UserOpSubmitter {
    signer: Arc<dyn TransactionSigner>,
    relay: Arc<dyn RelayClient>,
}

impl UserOpSubmitter {
    #[must_use]
    pub fn new(signer: Arc<dyn TransactionSigner>, relay: Arc<dyn RelayClient>) -> Self {
        Self { signer, relay }
    }

    /// Process one user-operation row. A failure anywhere marks the row
    /// `Errored`; it never propagates to the cycle.
    #[instrument(skip(self, ctx, row), fields(queue_id = %row.queue_id))]
    pub async fn process_row(&self, ctx: &CycleContext, row: &QueuedTransaction) -> Option<String> {
        let update = match self.submit(row).await {
            Ok(user_op_hash) => {
                info!(queue_id = %row.queue_id, user_op_hash = %user_op_hash, "User operation sent");
                TransactionUpdate {
                    status: Some(TransactionStatus::UserOpSent),
                    user_op_hash: Some(user_op_hash),
                    sent_at: Some(chrono::Utc::now()),
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(queue_id = %row.queue_id, error = %e, "User operation failed");
                TransactionUpdate::errored(e.to_string())
            }
        };

        let mut store = ctx.store.lock().await;
        match store.update_transaction(&row.queue_id, update).await {
            Ok(()) => Some(row.queue_id.clone()),
            Err(e) => {
                error!(queue_id = %row.queue_id, error = %e, "Failed to persist user-op row");
                None
            }
        }
    }

    async fn submit(&self, row: &QueuedTransaction) -> Result<String, AppError> {
        let account_address = row.account_address.as_deref().ok_or_else(|| {
            AppError::Dispatch(DispatchError::SubmissionRejected(
                "User operation has no account address".to_string(),
            ))
        })?;
        let signer_address = row.signer_address.as_deref().ok_or_else(|| {
            AppError::Dispatch(DispatchError::SubmissionRejected(
                "User operation has no signer address".to_string(),
            ))
        })?;
        let to_address = row.to_address.as_deref().ok_or_else(|| {
            AppError::Dispatch(DispatchError::SubmissionRejected(
                "User operation has no destination address".to_string(),
            ))
        })?;

        // Random nonce: user-op nonces only need uniqueness per account,
        // not sequencing.
        let nonce = rand::random::<u128>();

        let operation = UserOperation {
            sender: account_address.to_string(),
            target: to_address.to_string(),
            data: row.data.clone().unwrap_or_else(|| "0x".to_string()),
            value: row.value.clone(),
            nonce: nonce.to_string(),
        };

        let signed = self
            .signer
            .sign_user_operation(signer_address, &operation)
            .await?;

        let user_op_hash = hash_user_operation(&signed)?;

        self.relay.send_user_operation(&signed).await?;

        Ok(user_op_hash)
    }
}

/// Tracking hash over the signed operation's canonical JSON form
fn hash_user_operation(
    signed: &crate::domain::SignedUserOperation,
) -> Result<String, AppError> {
    let canonical = serde_json::to_string(signed).map_err(|e| {
        AppError::Dispatch(DispatchError::SubmissionRejected(format!(
            "failed to encode user operation: {}",
            e
        )))
    })?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("0x{}", hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SignedUserOperation;

    fn signed_op(nonce: &str) -> SignedUserOperation {
        SignedUserOperation {
            operation: UserOperation {
                sender: "0xaccount".to_string(),
                target: "0xto".to_string(),
                data: "0x".to_string(),
                value: Some("0".to_string()),
                nonce: nonce.to_string(),
            },
            signature: "0xsig".to_string(),
        }
    }

    #[test]
    fn test_hash_is_hex_prefixed_and_deterministic() {
        let a = hash_user_operation(&signed_op("1")).unwrap();
        let b = hash_user_operation(&signed_op("1")).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("0x"));
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn test_hash_differs_per_operation() {
        let a = hash_user_operation(&signed_op("1")).unwrap();
        let b = hash_user_operation(&signed_op("2")).unwrap();
        assert_ne!(a, b);
    }
}
