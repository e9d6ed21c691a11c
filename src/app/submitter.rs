//! Plain-network submission path.
//!
//! Drains one (wallet, chain) group strictly in order: the i-th accepted
//! send gets nonce `start + offset`, where the offset also advances past
//! nonces the network reports as already consumed.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, BalanceAlert, BroadcastOutcome, DispatchError, FeeEstimate, NetworkClient, Networks,
    PreparedTransaction, QueuedTransaction, TransactionKind, TransactionSigner, TransactionStatus,
    TransactionUpdate,
};
use crate::infra::webhook::WebhookNotifier;

use super::dispatcher::CycleContext;
use super::nonce::NonceCoordinator;

/// Gas limit safety margin over the estimate, in percent
const GAS_LIMIT_MARGIN_PERCENT: u64 = 120;

/// Result of draining one group
#[derive(Debug, Default)]
pub struct GroupOutcome {
    /// Rows whose status changed and need a webhook after commit
    pub touched: Vec<String>,
    pub submitted: usize,
    pub errored: usize,
}

/// An accepted broadcast awaiting confirmation detail
struct AcceptedSend {
    queue_id: String,
    nonce: u64,
    transaction_hash: String,
    sent_at: chrono::DateTime<chrono::Utc>,
}

/// Running state for one group drain; lets the group-level fault handler
/// see which rows were already persisted.
#[derive(Default)]
struct GroupState {
    outcome: GroupOutcome,
    persisted: HashSet<String>,
}

/// Sends plain transactions for one group at a time
pub struct NetworkSubmitter {
    networks: Arc<dyn Networks>,
    signer: Arc<dyn TransactionSigner>,
    notifier: Arc<WebhookNotifier>,
    /// Cap on consecutive stale-nonce retries for a single row
    max_stale_nonce_retries: u32,
}

impl NetworkSubmitter {
    #[must_use]
    pub fn new(
        networks: Arc<dyn Networks>,
        signer: Arc<dyn TransactionSigner>,
        notifier: Arc<WebhookNotifier>,
        max_stale_nonce_retries: u32,
    ) -> Self {
        Self {
            networks,
            signer,
            notifier,
            max_stale_nonce_retries,
        }
    }

    /// Process one (wallet, chain) group. Never returns an error: a fault
    /// outside the per-row loop marks the group's unpersisted rows
    /// `Errored` and is contained here.
    #[instrument(skip(self, ctx, rows), fields(wallet = %from_address, chain_id, count = rows.len()))]
    pub async fn process_group(
        &self,
        ctx: &CycleContext,
        from_address: &str,
        chain_id: i64,
        rows: &[QueuedTransaction],
    ) -> GroupOutcome {
        let mut state = GroupState::default();

        if let Err(e) = self
            .drain_group(ctx, from_address, chain_id, rows, &mut state)
            .await
        {
            error!(
                wallet = %from_address,
                chain_id,
                error = %e,
                "Failed to process transaction batch for wallet"
            );
            let message = format!(
                "Failed to process batch of transactions for wallet {} on chain {}: {}",
                from_address, chain_id, e
            );
            let mut store = ctx.store.lock().await;
            for row in rows {
                if state.persisted.contains(&row.queue_id) {
                    continue;
                }
                match store
                    .update_transaction(&row.queue_id, TransactionUpdate::errored(&message))
                    .await
                {
                    Ok(()) => {
                        state.outcome.touched.push(row.queue_id.clone());
                        state.outcome.errored += 1;
                    }
                    Err(e) => {
                        error!(queue_id = %row.queue_id, error = %e, "Failed to record group error")
                    }
                }
            }
        }

        state.outcome
    }

    async fn drain_group(
        &self,
        ctx: &CycleContext,
        from_address: &str,
        chain_id: i64,
        rows: &[QueuedTransaction],
        state: &mut GroupState,
    ) -> Result<(), AppError> {
        let network = self.networks.network(chain_id)?;

        let (balance, fees) =
            tokio::try_join!(network.balance(from_address), network.fee_estimate())?;

        self.check_wallet_balance(ctx, from_address, chain_id, balance)
            .await;

        let coordinator = NonceCoordinator::new(&ctx.store, Arc::clone(&network));
        let start_nonce = coordinator.resolve_start(from_address, chain_id).await?;

        let mut accepted: Vec<AcceptedSend> = Vec::new();
        let mut tx_index = 0usize;
        let mut nonce_offset: u64 = 0;
        let mut stale_retries: u32 = 0;

        while tx_index < rows.len() {
            if Instant::now() >= ctx.deadline {
                return Err(AppError::Dispatch(DispatchError::CycleTimeout));
            }

            let row = &rows[tx_index];
            let nonce = start_nonce + nonce_offset;

            match self
                .attempt_send(&network, row, from_address, chain_id, nonce, &fees, balance)
                .await
            {
                Ok(BroadcastOutcome::Accepted { transaction_hash }) => {
                    info!(
                        queue_id = %row.queue_id,
                        nonce,
                        hash = %transaction_hash,
                        "Transaction accepted by network"
                    );
                    accepted.push(AcceptedSend {
                        queue_id: row.queue_id.clone(),
                        nonce,
                        transaction_hash,
                        sent_at: chrono::Utc::now(),
                    });
                    nonce_offset += 1;
                    tx_index += 1;
                    stale_retries = 0;
                }
                Ok(BroadcastOutcome::StaleNonce { message }) => {
                    // The nonce was consumed outside this engine; burn it
                    // and retry the same row with the next one.
                    warn!(queue_id = %row.queue_id, nonce, message = %message, "Nonce stale, retrying with next");
                    nonce_offset += 1;
                    stale_retries += 1;
                    if stale_retries > self.max_stale_nonce_retries {
                        let err = DispatchError::StaleNonce { nonce };
                        self.record_error(
                            ctx,
                            state,
                            &row.queue_id,
                            format!(
                                "{} after {} retries: {}",
                                err, self.max_stale_nonce_retries, message
                            ),
                        )
                        .await;
                        tx_index += 1;
                        stale_retries = 0;
                    }
                }
                Ok(BroadcastOutcome::Rejected { message }) => {
                    // The network saw this nonce; treat it as consumed even
                    // though the row failed.
                    self.record_error(ctx, state, &row.queue_id, message).await;
                    nonce_offset += 1;
                    tx_index += 1;
                    stale_retries = 0;
                }
                Err(e) => {
                    warn!(queue_id = %row.queue_id, error = %e, "Failed to send");
                    self.record_error(ctx, state, &row.queue_id, e.to_string())
                        .await;
                    tx_index += 1;
                    stale_retries = 0;
                }
            }
        }

        // Persisted whatever the per-row outcomes were: none of the
        // consumed nonces may ever be reissued.
        coordinator
            .finalize(from_address, chain_id, start_nonce + nonce_offset)
            .await?;

        self.persist_accepted(ctx, &network, accepted, state).await;

        Ok(())
    }

    /// Steps 1-6 of the per-row contract: value resolution, population,
    /// signing, broadcast, classification.
    async fn attempt_send(
        &self,
        network: &Arc<dyn NetworkClient>,
        row: &QueuedTransaction,
        from_address: &str,
        chain_id: i64,
        nonce: u64,
        fees: &FeeEstimate,
        balance: u128,
    ) -> Result<BroadcastOutcome, AppError> {
        let to_address = row.to_address.as_deref().ok_or_else(|| {
            AppError::Dispatch(DispatchError::SubmissionRejected(
                "Transaction has no destination address".to_string(),
            ))
        })?;

        let value = resolve_value(row, fees, balance)?;

        let gas_limit = fees.gas_limit * GAS_LIMIT_MARGIN_PERCENT / 100;
        let prepared = PreparedTransaction {
            chain_id,
            from: from_address.to_string(),
            to: to_address.to_string(),
            value: value.to_string(),
            data: row.data.clone().unwrap_or_else(|| "0x".to_string()),
            nonce,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas.to_string(),
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas.to_string(),
        };

        debug!(
            queue_id = %row.queue_id,
            nonce,
            gas_limit,
            "Populated transaction"
        );

        let signed = self.signer.sign_transaction(&prepared).await?;
        network.send_raw_transaction(&signed).await
    }

    /// Resolve final on-chain detail for accepted sends in parallel, then
    /// persist `Submitted` for each.
    async fn persist_accepted(
        &self,
        ctx: &CycleContext,
        network: &Arc<dyn NetworkClient>,
        accepted: Vec<AcceptedSend>,
        state: &mut GroupState,
    ) {
        if accepted.is_empty() {
            return;
        }

        let mut lookups = JoinSet::new();
        for send in accepted {
            let network = Arc::clone(network);
            lookups.spawn(async move {
                let block = match network.transaction_confirmation(&send.transaction_hash).await {
                    Ok(Some(detail)) => Some(detail.block_number),
                    Ok(None) => network.block_number().await.ok(),
                    Err(e) => {
                        warn!(hash = %send.transaction_hash, error = %e, "Confirmation lookup failed");
                        None
                    }
                };
                (send, block)
            });
        }

        while let Some(joined) = lookups.join_next().await {
            let Ok((send, block)) = joined else {
                error!("Confirmation lookup task failed");
                continue;
            };

            let update = TransactionUpdate {
                status: Some(TransactionStatus::Submitted),
                nonce: Some(send.nonce as i64),
                transaction_hash: Some(send.transaction_hash.clone()),
                sent_at: Some(send.sent_at),
                sent_at_block: block,
                ..Default::default()
            };

            let mut store = ctx.store.lock().await;
            match store.update_transaction(&send.queue_id, update).await {
                Ok(()) => {
                    state.persisted.insert(send.queue_id.clone());
                    state.outcome.touched.push(send.queue_id);
                    state.outcome.submitted += 1;
                }
                Err(e) => {
                    error!(queue_id = %send.queue_id, error = %e, "Failed to persist submitted row")
                }
            }
        }
    }

    async fn record_error(
        &self,
        ctx: &CycleContext,
        state: &mut GroupState,
        queue_id: &str,
        message: String,
    ) {
        let mut store = ctx.store.lock().await;
        match store
            .update_transaction(queue_id, TransactionUpdate::errored(message))
            .await
        {
            Ok(()) => {
                state.persisted.insert(queue_id.to_string());
                state.outcome.touched.push(queue_id.to_string());
                state.outcome.errored += 1;
            }
            Err(e) => error!(queue_id = %queue_id, error = %e, "Failed to persist errored row"),
        }
    }

    /// Fire a throttled low-balance alert when the wallet is at or below
    /// the configured minimum.
    async fn check_wallet_balance(
        &self,
        ctx: &CycleContext,
        from_address: &str,
        chain_id: i64,
        balance: u128,
    ) {
        let minimum: u128 = match ctx.settings.min_wallet_balance.parse() {
            Ok(minimum) => minimum,
            Err(_) => {
                warn!(
                    value = %ctx.settings.min_wallet_balance,
                    "Invalid minimum wallet balance setting, skipping balance check"
                );
                return;
            }
        };

        if balance > minimum {
            return;
        }

        let message =
            "Wallet balance is below minimum threshold. Please top up your wallet.".to_string();
        warn!(wallet = %from_address, chain_id, balance, "{}", message);

        self.notifier
            .notify_balance(&BalanceAlert {
                wallet_address: from_address.to_string(),
                chain_id,
                current_balance: balance.to_string(),
                minimum_balance: minimum.to_string(),
                message,
            })
            .await;
    }
}

/// Resolve the transfer amount for a row.
///
/// Withdrawals derive the amount from the live balance minus the
/// worst-case fee for the transfer; everything else uses the stored value.
fn resolve_value(
    row: &QueuedTransaction,
    fees: &FeeEstimate,
    balance: u128,
) -> Result<u128, AppError> {
    match row.kind {
        TransactionKind::Standard => {
            let stored = row.value.as_deref().unwrap_or("0");
            stored.parse::<u128>().map_err(|e| {
                AppError::Dispatch(DispatchError::ValueResolutionFailure(format!(
                    "invalid stored value '{}': {}",
                    stored, e
                )))
            })
        }
        TransactionKind::Withdrawal => {
            let worst_case_fee = fees.max_fee_per_gas.saturating_mul(fees.gas_limit as u128);
            let available = balance.saturating_sub(worst_case_fee);
            if available == 0 {
                return Err(AppError::Dispatch(DispatchError::ValueResolutionFailure(
                    format!(
                        "balance {} does not cover the withdrawal fee {}",
                        balance, worst_case_fee
                    ),
                )));
            }
            Ok(available)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row_with(kind: TransactionKind, value: Option<&str>) -> QueuedTransaction {
        let now = Utc::now();
        QueuedTransaction {
            queue_id: "q1".to_string(),
            chain_id: 1,
            from_address: Some("0xfrom".to_string()),
            to_address: Some("0xto".to_string()),
            account_address: None,
            signer_address: None,
            value: value.map(str::to_string),
            data: None,
            kind,
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

    fn fees() -> FeeEstimate {
        FeeEstimate {
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 10,
            gas_limit: 21_000,
        }
    }

    #[test]
    fn test_standard_value_uses_stored_amount() {
        let row = row_with(TransactionKind::Standard, Some("12345"));
        assert_eq!(resolve_value(&row, &fees(), 0).unwrap(), 12345);
    }

    #[test]
    fn test_standard_value_rejects_garbage() {
        let row = row_with(TransactionKind::Standard, Some("not-a-number"));
        let err = resolve_value(&row, &fees(), 0).unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::ValueResolutionFailure(_))
        ));
    }

    #[test]
    fn test_withdrawal_value_subtracts_worst_case_fee() {
        let row = row_with(TransactionKind::Withdrawal, None);
        // balance 10_000_000, fee = 100 * 21_000 = 2_100_000
        assert_eq!(resolve_value(&row, &fees(), 10_000_000).unwrap(), 7_900_000);
    }

    #[test]
    fn test_withdrawal_fails_when_balance_cannot_cover_fee() {
        let row = row_with(TransactionKind::Withdrawal, None);
        let err = resolve_value(&row, &fees(), 1_000).unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::ValueResolutionFailure(_))
        ));
    }
}
