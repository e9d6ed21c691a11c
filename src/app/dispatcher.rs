//! Batch dispatch cycle.
//!
//! One cycle claims a batch of queued rows inside a single database
//! transaction, fans groups out to the submitters, and commits once every
//! group has settled. Dropping the transaction before commit (timeout or
//! fault) releases the claimed rows untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, CycleOutcome, CycleStore, DispatchError, EngineSettings, QueueStore,
    QueuedTransaction, TransactionStatus, TransactionUpdate,
};
use crate::infra::webhook::WebhookNotifier;

use super::submitter::NetworkSubmitter;
use super::user_op::UserOpSubmitter;

/// The cycle's database transaction, shared across group tasks
pub type SharedCycleStore = Arc<Mutex<Box<dyn CycleStore>>>;

/// Per-cycle state threaded through every submitter task
#[derive(Clone)]
pub struct CycleContext {
    pub cycle_id: Uuid,
    /// Hard wall for the atomic section; tasks bail once it passes
    pub deadline: Instant,
    pub store: SharedCycleStore,
    pub settings: EngineSettings,
}

/// Tuning for the dispatch loop
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on rows claimed per cycle
    pub batch_size: i64,
    /// Wall-clock bound on the atomic section of a cycle
    pub cycle_timeout: Duration,
    /// Consecutive stale-nonce retries allowed for one row
    pub max_stale_nonce_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            cycle_timeout: Duration::from_secs(300),
            max_stale_nonce_retries: 5,
        }
    }
}

/// Drives dispatch cycles against the queue
pub struct BatchDispatcher {
    queue_store: Arc<dyn QueueStore>,
    submitter: Arc<NetworkSubmitter>,
    user_op_submitter: Arc<UserOpSubmitter>,
    notifier: Arc<WebhookNotifier>,
    config: DispatcherConfig,
}

/// Locked rows split by submission path
struct Partition {
    groups: HashMap<(String, i64), Vec<QueuedTransaction>>,
    user_ops: Vec<QueuedTransaction>,
    cancelled: Vec<QueuedTransaction>,
    malformed: Vec<QueuedTransaction>,
}

impl BatchDispatcher {
    #[must_use]
    pub fn new(
        queue_store: Arc<dyn QueueStore>,
        submitter: Arc<NetworkSubmitter>,
        user_op_submitter: Arc<UserOpSubmitter>,
        notifier: Arc<WebhookNotifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue_store,
            submitter,
            user_op_submitter,
            notifier,
            config,
        }
    }

    /// Run one full dispatch cycle.
    ///
    /// Claim, submission, and status persistence happen inside one database
    /// transaction bounded by `cycle_timeout`; webhooks for the final
    /// statuses fire only after that transaction commits.
    ///
    /// A timeout after a broadcast but before commit rolls the row back to
    /// `Queued`, so the next cycle may send it again. There is no
    /// idempotency key; producers must tolerate that duplicate.
    #[instrument(skip(self), fields(cycle_id))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, AppError> {
        let cycle_id = Uuid::new_v4();
        tracing::Span::current().record("cycle_id", tracing::field::display(cycle_id));

        let (outcome, touched) =
            match tokio::time::timeout(self.config.cycle_timeout, self.atomic_cycle(cycle_id))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(%cycle_id, "Cycle exceeded its deadline, rolling back");
                    return Err(AppError::Dispatch(DispatchError::CycleTimeout));
                }
            };

        if !touched.is_empty() {
            self.notifier.notify_queue_ids(&touched).await;
        }

        Ok(outcome)
    }

    /// Everything between claim and commit
    async fn atomic_cycle(
        &self,
        cycle_id: Uuid,
    ) -> Result<(CycleOutcome, Vec<String>), AppError> {
        let mut cycle_store = self.queue_store.begin_cycle().await?;

        let locked = cycle_store.lock_queued(self.config.batch_size).await?;
        let settings = cycle_store.engine_settings().await?;

        if (locked.len() as i64) < settings.min_txs_to_process.max(1) {
            debug!(
                %cycle_id,
                available = locked.len(),
                minimum = settings.min_txs_to_process,
                "Not enough queued transactions, skipping cycle"
            );
            return Ok((
                CycleOutcome::Skipped {
                    available: locked.len(),
                },
                Vec::new(),
            ));
        }

        info!(%cycle_id, count = locked.len(), "Claimed queued transactions");

        // Claim notification goes out while the rows are still locked, so
        // a subscriber never sees a row it cannot observe as claimed.
        self.notifier.notify_transactions(&locked).await;

        let partition = partition_rows(locked);

        let mut touched: Vec<String> = Vec::new();
        let mut errored = 0usize;

        // Cancelled rows get no status write at all; their locks release
        // at commit and the cancelling actor owns their final state.
        let cancelled = partition.cancelled.len();
        for row in &partition.cancelled {
            debug!(%cycle_id, queue_id = %row.queue_id, "Skipping cancelled transaction");
        }

        for row in &partition.malformed {
            cycle_store
                .update_transaction(
                    &row.queue_id,
                    TransactionUpdate::errored("Transaction has no sending wallet address"),
                )
                .await?;
            touched.push(row.queue_id.clone());
            errored += 1;
        }

        for row in partition
            .groups
            .values()
            .flatten()
            .chain(partition.user_ops.iter())
        {
            cycle_store
                .update_transaction(
                    &row.queue_id,
                    TransactionUpdate::status(TransactionStatus::Processed),
                )
                .await?;
        }

        let store: SharedCycleStore = Arc::new(Mutex::new(cycle_store));
        let ctx = CycleContext {
            cycle_id,
            deadline: Instant::now() + self.config.cycle_timeout,
            store: Arc::clone(&store),
            settings,
        };

        let mut tasks: JoinSet<GroupResult> = JoinSet::new();

        for ((from_address, chain_id), rows) in partition.groups {
            let submitter = Arc::clone(&self.submitter);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let outcome = submitter
                    .process_group(&ctx, &from_address, chain_id, &rows)
                    .await;
                GroupResult::Plain(outcome)
            });
        }

        for row in partition.user_ops {
            let submitter = Arc::clone(&self.user_op_submitter);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                GroupResult::UserOp(submitter.process_row(&ctx, &row).await)
            });
        }

        let mut submitted = 0usize;
        let mut user_ops_sent = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(GroupResult::Plain(outcome)) => {
                    submitted += outcome.submitted;
                    errored += outcome.errored;
                    touched.extend(outcome.touched);
                }
                Ok(GroupResult::UserOp(Some(queue_id))) => {
                    user_ops_sent += 1;
                    touched.push(queue_id);
                }
                Ok(GroupResult::UserOp(None)) => errored += 1,
                Err(e) => {
                    error!(%cycle_id, error = %e, "Group task panicked");
                    errored += 1;
                }
            }
        }

        drop(ctx);
        let store = Arc::try_unwrap(store).map_err(|_| {
            AppError::Dispatch(DispatchError::SubmissionRejected(
                "cycle transaction still shared after all tasks joined".to_string(),
            ))
        })?;
        store.into_inner().commit().await?;

        info!(
            %cycle_id,
            submitted,
            user_ops_sent,
            errored,
            cancelled,
            "Dispatch cycle committed"
        );

        Ok((
            CycleOutcome::Completed {
                submitted,
                user_ops_sent,
                errored,
                cancelled,
            },
            touched,
        ))
    }
}

enum GroupResult {
    Plain(super::submitter::GroupOutcome),
    UserOp(Option<String>),
}

/// Split locked rows into the cancelled, user-operation, malformed, and
/// per-(wallet, chain) plain sets.
fn partition_rows(locked: Vec<QueuedTransaction>) -> Partition {
    let mut groups: HashMap<(String, i64), Vec<QueuedTransaction>> = HashMap::new();
    let mut user_ops = Vec::new();
    let mut cancelled = Vec::new();
    let mut malformed = Vec::new();

    for row in locked {
        if row.cancelled_at.is_some() {
            cancelled.push(row);
        } else if row.is_user_operation() {
            user_ops.push(row);
        } else if let Some(from) = row.from_address.clone() {
            groups.entry((from, row.chain_id)).or_default().push(row);
        } else {
            malformed.push(row);
        }
    }

    Partition {
        groups,
        user_ops,
        cancelled,
        malformed,
    }
}
