//! Mock implementations for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::{
    AppError, BroadcastOutcome, ConfirmationDetail, CycleStore, DatabaseError, EngineSettings,
    FeeEstimate, NetworkClient, NetworkError, Networks, PreparedTransaction, QueueStore,
    QueuedTransaction, RelayClient, SignedUserOperation, SubscriptionStore, TransactionSigner,
    TransactionUpdate, UserOperation, WebhookSubscription,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// Shared backing state for the mock queue store and its cycle handles
#[derive(Default)]
struct QueueState {
    rows: HashMap<String, QueuedTransaction>,
    nonces: HashMap<(String, i64), u64>,
    /// Row-level locks held by live cycle handles, as the database's
    /// `FOR UPDATE SKIP LOCKED` claim would be.
    claimed: HashSet<String>,
    /// Per-(wallet, chain) row locks serializing nonce access across
    /// concurrent cycles, held until the owning handle drops.
    nonce_locks: HashMap<(String, i64), Arc<tokio::sync::Mutex<()>>>,
    settings: EngineSettings,
}

/// Mock queue store for testing.
///
/// Updates apply eagerly; `commit` is a no-op and dropping an uncommitted
/// cycle does not roll anything back.
pub struct MockQueueStore {
    state: Arc<Mutex<QueueState>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn insert(&self, row: QueuedTransaction) {
        self.state
            .lock()
            .unwrap()
            .rows
            .insert(row.queue_id.clone(), row);
    }

    pub fn set_settings(&self, settings: EngineSettings) {
        self.state.lock().unwrap().settings = settings;
    }

    pub fn set_nonce(&self, address: &str, chain_id: i64, nonce: u64) {
        self.state
            .lock()
            .unwrap()
            .nonces
            .insert((address.to_string(), chain_id), nonce);
    }

    /// Get one stored row by id (for testing)
    pub fn row(&self, queue_id: &str) -> Option<QueuedTransaction> {
        self.state.lock().unwrap().rows.get(queue_id).cloned()
    }

    /// Get all stored rows (for testing)
    pub fn all_rows(&self) -> Vec<QueuedTransaction> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    pub fn nonce(&self, address: &str, chain_id: i64) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .nonces
            .get(&(address.to_string(), chain_id))
            .copied()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MockQueueStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn begin_cycle(&self) -> Result<Box<dyn CycleStore>, AppError> {
        self.check_should_fail()?;
        Ok(Box::new(MockCycleStore {
            state: Arc::clone(&self.state),
            config: self.config.clone(),
            claims: HashSet::new(),
            nonce_guards: HashMap::new(),
        }))
    }

    async fn load_transactions(
        &self,
        queue_ids: &[String],
    ) -> Result<Vec<QueuedTransaction>, AppError> {
        self.check_should_fail()?;
        let state = self.state.lock().unwrap();
        Ok(queue_ids
            .iter()
            .filter_map(|id| state.rows.get(id).cloned())
            .collect())
    }
}

/// Cycle handle over the shared mock state
pub struct MockCycleStore {
    state: Arc<Mutex<QueueState>>,
    config: MockConfig,
    claims: HashSet<String>,
    nonce_guards: HashMap<(String, i64), tokio::sync::OwnedMutexGuard<()>>,
}

impl MockCycleStore {
    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }

    /// Take the per-key nonce lock if this handle does not hold it yet.
    /// Mirrors the database's `SELECT ... FOR UPDATE` on the nonce row:
    /// a second cycle touching the same (wallet, chain) pair blocks here
    /// until the first handle drops.
    async fn lock_nonce_row(&mut self, key: &(String, i64)) {
        if self.nonce_guards.contains_key(key) {
            return;
        }
        let lock = {
            let mut state = self.state.lock().unwrap();
            Arc::clone(state.nonce_locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        self.nonce_guards.insert(key.clone(), guard);
    }
}

impl Drop for MockCycleStore {
    fn drop(&mut self) {
        // Release row claims; nonce guards release on their own.
        if let Ok(mut state) = self.state.lock() {
            for id in self.claims.drain() {
                state.claimed.remove(&id);
            }
        }
    }
}

#[async_trait]
impl CycleStore for MockCycleStore {
    async fn lock_queued(&mut self, limit: i64) -> Result<Vec<QueuedTransaction>, AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let mut rows: Vec<QueuedTransaction> = state
            .rows
            .values()
            .filter(|r| {
                r.status == crate::domain::TransactionStatus::Queued
                    && !state.claimed.contains(&r.queue_id)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.queue_id.cmp(&b.queue_id)));
        rows.truncate(limit.max(0) as usize);
        for row in &rows {
            state.claimed.insert(row.queue_id.clone());
            self.claims.insert(row.queue_id.clone());
        }
        Ok(rows)
    }

    async fn update_transaction(
        &mut self,
        queue_id: &str,
        update: TransactionUpdate,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .get_mut(queue_id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(queue_id.to_string())))?;
        if let Some(status) = update.status {
            row.status = status;
        }
        if let Some(nonce) = update.nonce {
            row.nonce = Some(nonce);
        }
        if let Some(hash) = update.transaction_hash {
            row.transaction_hash = Some(hash);
        }
        if let Some(hash) = update.user_op_hash {
            row.user_op_hash = Some(hash);
        }
        if let Some(message) = update.error_message {
            row.error_message = Some(message);
        }
        if let Some(sent_at) = update.sent_at {
            row.sent_at = Some(sent_at);
        }
        if let Some(block) = update.sent_at_block {
            row.sent_at_block = Some(block);
        }
        row.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn wallet_nonce(
        &mut self,
        address: &str,
        chain_id: i64,
    ) -> Result<Option<u64>, AppError> {
        self.check_should_fail()?;
        let key = (address.to_string(), chain_id);
        self.lock_nonce_row(&key).await;
        let state = self.state.lock().unwrap();
        Ok(state.nonces.get(&key).copied())
    }

    async fn set_wallet_nonce(
        &mut self,
        address: &str,
        chain_id: i64,
        nonce: u64,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let key = (address.to_string(), chain_id);
        self.lock_nonce_row(&key).await;
        let mut state = self.state.lock().unwrap();
        let entry = state.nonces.entry(key).or_insert(0);
        // Same monotonic semantics as the database upsert
        *entry = (*entry).max(nonce);
        Ok(())
    }

    async fn engine_settings(&mut self) -> Result<EngineSettings, AppError> {
        self.check_should_fail()?;
        Ok(self.state.lock().unwrap().settings.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.check_should_fail()
    }
}

/// Mock network client with scriptable broadcast outcomes
pub struct MockNetworkClient {
    config: MockConfig,
    is_healthy: AtomicBool,
    pending_nonce: AtomicU64,
    balance: Mutex<u128>,
    fees: Mutex<FeeEstimate>,
    block: AtomicU64,
    scripted: Mutex<VecDeque<BroadcastOutcome>>,
    sent: Mutex<Vec<String>>,
}

impl MockNetworkClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            is_healthy: AtomicBool::new(true),
            pending_nonce: AtomicU64::new(0),
            balance: Mutex::new(1_000_000_000_000_000_000),
            fees: Mutex::new(FeeEstimate {
                max_fee_per_gas: 100,
                max_priority_fee_per_gas: 10,
                gas_limit: 21_000,
            }),
            block: AtomicU64::new(100),
            scripted: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.pending_nonce.store(nonce, Ordering::Relaxed);
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_fees(&self, fees: FeeEstimate) {
        *self.fees.lock().unwrap() = fees;
    }

    /// Queue an outcome for the next broadcast; once drained, broadcasts
    /// are accepted with a generated hash.
    pub fn script_outcome(&self, outcome: BroadcastOutcome) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    /// Raw payloads passed to `send_raw_transaction` (for testing)
    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Nonces of broadcast transactions, in send order. Relies on
    /// `MockSigner` encoding the populated transaction as JSON.
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|payload| {
                serde_json::from_str::<serde_json::Value>(payload)
                    .ok()?
                    .get("nonce")?
                    .as_u64()
            })
            .collect()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Network(NetworkError::Rpc(self.config.message())));
        }
        Ok(())
    }
}

impl Default for MockNetworkClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkClient for MockNetworkClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Network(NetworkError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn pending_nonce(&self, _address: &str) -> Result<u64, AppError> {
        self.check_should_fail()?;
        Ok(self.pending_nonce.load(Ordering::Relaxed))
    }

    async fn balance(&self, _address: &str) -> Result<u128, AppError> {
        self.check_should_fail()?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, AppError> {
        self.check_should_fail()?;
        Ok(self.fees.lock().unwrap().clone())
    }

    async fn send_raw_transaction(
        &self,
        signed_payload: &str,
    ) -> Result<BroadcastOutcome, AppError> {
        self.check_should_fail()?;
        let scripted = self.scripted.lock().unwrap().pop_front();
        let mut sent = self.sent.lock().unwrap();
        sent.push(signed_payload.to_string());
        Ok(scripted.unwrap_or_else(|| BroadcastOutcome::Accepted {
            transaction_hash: format!("0xhash{}", sent.len()),
        }))
    }

    async fn transaction_confirmation(
        &self,
        transaction_hash: &str,
    ) -> Result<Option<ConfirmationDetail>, AppError> {
        self.check_should_fail()?;
        Ok(Some(ConfirmationDetail {
            transaction_hash: transaction_hash.to_string(),
            block_number: self.block.load(Ordering::Relaxed) as i64,
        }))
    }

    async fn block_number(&self) -> Result<i64, AppError> {
        self.check_should_fail()?;
        Ok(self.block.load(Ordering::Relaxed) as i64)
    }
}

/// Mock network registry over explicit chain ids
pub struct MockNetworks {
    clients: HashMap<i64, Arc<dyn NetworkClient>>,
}

impl MockNetworks {
    #[must_use]
    pub fn single(chain_id: i64, client: Arc<dyn NetworkClient>) -> Self {
        let mut clients: HashMap<i64, Arc<dyn NetworkClient>> = HashMap::new();
        clients.insert(chain_id, client);
        Self { clients }
    }

    pub fn insert(&mut self, chain_id: i64, client: Arc<dyn NetworkClient>) {
        self.clients.insert(chain_id, client);
    }
}

impl Networks for MockNetworks {
    fn network(&self, chain_id: i64) -> Result<Arc<dyn NetworkClient>, AppError> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or(AppError::Network(NetworkError::UnknownChain(chain_id)))
    }
}

/// Mock signer: the "signed payload" is the populated transaction as JSON,
/// so tests can read back what was broadcast.
pub struct MockSigner {
    config: MockConfig,
}

impl MockSigner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MockConfig::success(),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            config: MockConfig::failure(message),
        }
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign_transaction(&self, tx: &PreparedTransaction) -> Result<String, AppError> {
        if self.config.should_fail {
            return Err(AppError::Dispatch(
                crate::domain::DispatchError::SigningFailure(self.config.message()),
            ));
        }
        serde_json::to_string(tx).map_err(|e| {
            AppError::Dispatch(crate::domain::DispatchError::SigningFailure(e.to_string()))
        })
    }

    async fn sign_user_operation(
        &self,
        _signer_address: &str,
        operation: &UserOperation,
    ) -> Result<SignedUserOperation, AppError> {
        if self.config.should_fail {
            return Err(AppError::Dispatch(
                crate::domain::DispatchError::SigningFailure(self.config.message()),
            ));
        }
        Ok(SignedUserOperation {
            operation: operation.clone(),
            signature: "0xmocksignature".to_string(),
        })
    }
}

/// Mock relay client recording forwarded user operations
pub struct MockRelayClient {
    config: MockConfig,
    operations: Mutex<Vec<SignedUserOperation>>,
}

impl MockRelayClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MockConfig::success(),
            operations: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            config: MockConfig::failure(message),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Forwarded operations (for testing)
    pub fn operations(&self) -> Vec<SignedUserOperation> {
        self.operations.lock().unwrap().clone()
    }
}

impl Default for MockRelayClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn send_user_operation(&self, operation: &SignedUserOperation) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Network(NetworkError::Rpc(self.config.message())));
        }
        self.operations.lock().unwrap().push(operation.clone());
        Ok(())
    }
}

/// Mock subscription store with a fixed subscription list
pub struct MockSubscriptionStore {
    subscriptions: Mutex<Vec<WebhookSubscription>>,
    config: MockConfig,
}

impl MockSubscriptionStore {
    #[must_use]
    pub fn new(subscriptions: Vec<WebhookSubscription>) -> Self {
        Self {
            subscriptions: Mutex::new(subscriptions),
            config: MockConfig::success(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn set_subscriptions(&self, subscriptions: Vec<WebhookSubscription>) {
        *self.subscriptions.lock().unwrap() = subscriptions;
    }
}

#[async_trait]
impl SubscriptionStore for MockSubscriptionStore {
    async fn all_subscriptions(&self) -> Result<Vec<WebhookSubscription>, AppError> {
        if self.config.should_fail {
            return Err(AppError::Webhook(
                crate::domain::WebhookError::SubscriptionLoad(self.config.message()),
            ));
        }
        Ok(self.subscriptions.lock().unwrap().clone())
    }
}
