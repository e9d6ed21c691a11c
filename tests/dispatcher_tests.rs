//! End-to-end dispatch cycle tests over the mock stack.

use std::sync::Arc;

use evm_tx_dispatcher::app::{
    BatchDispatcher, DispatcherConfig, NetworkSubmitter, UserOpSubmitter,
};
use evm_tx_dispatcher::domain::{
    BroadcastOutcome, CycleOutcome, EngineSettings, TransactionStatus, WebhookEventKind,
    WebhookSubscription,
};
use evm_tx_dispatcher::infra::webhook::{AlertThrottle, SubscriptionCache, WebhookNotifier};
use evm_tx_dispatcher::test_utils::{
    MockNetworkClient, MockNetworks, MockQueueStore, MockRelayClient, MockSigner,
    MockSubscriptionStore, queued_transaction, queued_user_operation,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WALLET: &str = "0x00000000000000000000000000000000000a11ce";
const CHAIN: i64 = 1;

struct Harness {
    queue: Arc<MockQueueStore>,
    network: Arc<MockNetworkClient>,
    relay: Arc<MockRelayClient>,
    dispatcher: BatchDispatcher,
}

fn harness() -> Harness {
    harness_with_config(DispatcherConfig::default())
}

fn harness_with_config(config: DispatcherConfig) -> Harness {
    let queue = Arc::new(MockQueueStore::new());
    let network = Arc::new(MockNetworkClient::new());
    let relay = Arc::new(MockRelayClient::new());
    let dispatcher = dispatcher_over(&queue, &network, &relay, MockSubscriptionStore::empty(), config);

    Harness {
        queue,
        network,
        relay,
        dispatcher,
    }
}

/// Wire a dispatcher over externally owned stores so tests can share
/// them between several dispatchers or register webhook subscriptions.
fn dispatcher_over(
    queue: &Arc<MockQueueStore>,
    network: &Arc<MockNetworkClient>,
    relay: &Arc<MockRelayClient>,
    subscriptions: MockSubscriptionStore,
    config: DispatcherConfig,
) -> BatchDispatcher {
    let networks = Arc::new(MockNetworks::single(CHAIN, Arc::clone(network) as _));
    let signer = Arc::new(MockSigner::new());

    let cache = Arc::new(SubscriptionCache::new(Arc::new(subscriptions) as _));
    let notifier = Arc::new(
        WebhookNotifier::new(Arc::clone(queue) as _, cache, AlertThrottle::default()).unwrap(),
    );

    let submitter = Arc::new(NetworkSubmitter::new(
        networks as _,
        Arc::clone(&signer) as _,
        Arc::clone(&notifier),
        config.max_stale_nonce_retries,
    ));
    let user_op_submitter = Arc::new(UserOpSubmitter::new(signer as _, Arc::clone(relay) as _));

    BatchDispatcher::new(
        Arc::clone(queue) as _,
        submitter,
        user_op_submitter,
        notifier,
        config,
    )
}

#[tokio::test]
async fn test_group_gets_strictly_sequential_nonces() {
    let h = harness();
    h.network.set_pending_nonce(5);
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));
    h.queue.insert(queued_transaction("b", WALLET, CHAIN));
    h.queue.insert(queued_transaction("c", WALLET, CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            submitted: 3,
            errored: 0,
            ..
        }
    ));

    assert_eq!(h.network.sent_nonces(), vec![5, 6, 7]);
    for id in ["a", "b", "c"] {
        let row = h.queue.row(id).unwrap();
        assert_eq!(row.status, TransactionStatus::Submitted);
        assert!(row.transaction_hash.is_some());
        assert!(row.sent_at.is_some());
        assert_eq!(row.sent_at_block, Some(100));
    }
    // Next free nonce is one past the last accepted send
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(8));
}

#[tokio::test]
async fn test_stale_nonce_retries_same_row_with_next_nonce() {
    let h = harness();
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));
    h.network.script_outcome(BroadcastOutcome::StaleNonce {
        message: "nonce too low".to_string(),
    });

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed { submitted: 1, .. }
    ));

    // Same row broadcast twice, second attempt with the bumped nonce
    assert_eq!(h.network.sent_nonces(), vec![0, 1]);
    let row = h.queue.row("a").unwrap();
    assert_eq!(row.status, TransactionStatus::Submitted);
    assert_eq!(row.nonce, Some(1));
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(2));
}

#[tokio::test]
async fn test_stale_nonce_gives_up_after_retry_cap() {
    let h = harness_with_config(DispatcherConfig {
        max_stale_nonce_retries: 2,
        ..Default::default()
    });
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));
    for _ in 0..3 {
        h.network.script_outcome(BroadcastOutcome::StaleNonce {
            message: "nonce too low".to_string(),
        });
    }

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed { errored: 1, .. }));

    let row = h.queue.row("a").unwrap();
    assert_eq!(row.status, TransactionStatus::Errored);
    assert!(row.error_message.unwrap().contains("stale"));
    // Burned nonces stay burned
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(3));
}

#[tokio::test]
async fn test_rejected_row_is_errored_and_its_nonce_burned() {
    let h = harness();
    let mut first = queued_transaction("a", WALLET, CHAIN);
    first.created_at -= chrono::Duration::seconds(10);
    h.queue.insert(first);
    h.queue.insert(queued_transaction("b", WALLET, CHAIN));
    h.network.script_outcome(BroadcastOutcome::Rejected {
        message: "insufficient funds for gas".to_string(),
    });

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            submitted: 1,
            errored: 1,
            ..
        }
    ));

    let rejected = h.queue.row("a").unwrap();
    assert_eq!(rejected.status, TransactionStatus::Errored);
    assert!(rejected.error_message.unwrap().contains("insufficient"));

    // The rejected attempt consumed nonce 0; the next row moves past it
    let accepted = h.queue.row("b").unwrap();
    assert_eq!(accepted.status, TransactionStatus::Submitted);
    assert_eq!(accepted.nonce, Some(1));
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(2));
}

#[tokio::test]
async fn test_cancelled_rows_are_excluded_from_dispatch() {
    let h = harness();
    let mut cancelled = queued_transaction("a", WALLET, CHAIN);
    cancelled.cancelled_at = Some(chrono::Utc::now());
    h.queue.insert(cancelled);
    h.queue.insert(queued_transaction("b", WALLET, CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            submitted: 1,
            cancelled: 1,
            ..
        }
    ));

    // Cancelled rows get no status write from the engine at all
    let skipped = h.queue.row("a").unwrap();
    assert_eq!(skipped.status, TransactionStatus::Queued);
    assert!(skipped.nonce.is_none());
    assert_eq!(h.network.sent_payloads().len(), 1);
}

#[tokio::test]
async fn test_cycle_skips_below_minimum_batch() {
    let h = harness();
    h.queue.set_settings(EngineSettings {
        min_txs_to_process: 3,
        ..Default::default()
    });
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));
    h.queue.insert(queued_transaction("b", WALLET, CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Skipped { available: 2 }));

    // Nothing sent, rows still claimable
    assert!(h.network.sent_payloads().is_empty());
    assert_eq!(h.queue.row("a").unwrap().status, TransactionStatus::Queued);
}

#[tokio::test]
async fn test_user_operation_goes_through_relay() {
    let h = harness();
    h.queue.insert(queued_user_operation("op", CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            user_ops_sent: 1,
            submitted: 0,
            ..
        }
    ));

    let row = h.queue.row("op").unwrap();
    assert_eq!(row.status, TransactionStatus::UserOpSent);
    assert!(row.user_op_hash.unwrap().starts_with("0x"));
    assert!(row.sent_at.is_some());

    assert_eq!(h.relay.operations().len(), 1);
    // No wallet nonce touched for the smart-account path
    assert!(h.network.sent_payloads().is_empty());
}

#[tokio::test]
async fn test_group_failure_does_not_poison_other_groups() {
    let h = harness();
    // Chain 999 has no registered network client, so its group fails wholesale
    h.queue.insert(queued_transaction("bad", WALLET, 999));
    h.queue.insert(queued_transaction("good", WALLET, CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            submitted: 1,
            errored: 1,
            ..
        }
    ));

    let bad = h.queue.row("bad").unwrap();
    assert_eq!(bad.status, TransactionStatus::Errored);
    assert!(bad.error_message.unwrap().contains("999"));

    assert_eq!(h.queue.row("good").unwrap().status, TransactionStatus::Submitted);
}

#[tokio::test]
async fn test_start_nonce_reconciles_with_network_view() {
    let h = harness();
    h.queue.set_nonce(WALLET, CHAIN, 10);
    h.network.set_pending_nonce(12);
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));

    h.dispatcher.run_cycle().await.unwrap();

    // Network is ahead of the ledger, so the send starts from its view
    assert_eq!(h.network.sent_nonces(), vec![12]);
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(13));
}

#[tokio::test]
async fn test_ledger_nonce_wins_when_ahead_of_network() {
    let h = harness();
    h.queue.set_nonce(WALLET, CHAIN, 20);
    h.network.set_pending_nonce(4);
    h.queue.insert(queued_transaction("a", WALLET, CHAIN));

    h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(h.network.sent_nonces(), vec![20]);
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(21));
}

#[tokio::test]
async fn test_row_without_wallet_is_errored() {
    let h = harness();
    let mut row = queued_transaction("a", WALLET, CHAIN);
    row.from_address = None;
    h.queue.insert(row);

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed { errored: 1, .. }));

    let row = h.queue.row("a").unwrap();
    assert_eq!(row.status, TransactionStatus::Errored);
    assert!(row.error_message.unwrap().contains("wallet"));
}

#[tokio::test]
async fn test_mixed_batch_end_to_end() {
    let h = harness();
    h.network.set_pending_nonce(5);
    let mut first = queued_transaction("t1", WALLET, CHAIN);
    first.created_at -= chrono::Duration::seconds(10);
    h.queue.insert(first);
    h.queue.insert(queued_transaction("t2", WALLET, CHAIN));
    h.queue.insert(queued_user_operation("op1", CHAIN));

    let outcome = h.dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed {
            submitted: 2,
            user_ops_sent: 1,
            errored: 0,
            cancelled: 0,
        }
    ));

    assert_eq!(h.network.sent_nonces(), vec![5, 6]);
    assert_eq!(h.queue.row("t1").unwrap().nonce, Some(5));
    assert_eq!(h.queue.row("t2").unwrap().nonce, Some(6));
    assert_eq!(h.queue.nonce(WALLET, CHAIN), Some(7));
    assert_eq!(
        h.queue.row("op1").unwrap().status,
        TransactionStatus::UserOpSent
    );
}

#[tokio::test]
async fn test_concurrent_cycles_assign_disjoint_nonces() {
    let queue = Arc::new(MockQueueStore::new());
    let network = Arc::new(MockNetworkClient::new());
    let relay = Arc::new(MockRelayClient::new());
    let config = DispatcherConfig {
        batch_size: 2,
        ..DispatcherConfig::default()
    };
    let first = dispatcher_over(
        &queue,
        &network,
        &relay,
        MockSubscriptionStore::empty(),
        config.clone(),
    );
    let second = dispatcher_over(
        &queue,
        &network,
        &relay,
        MockSubscriptionStore::empty(),
        config,
    );

    for id in ["a", "b", "c", "d"] {
        queue.insert(queued_transaction(id, WALLET, CHAIN));
    }

    let (one, two) = tokio::join!(first.run_cycle(), second.run_cycle());
    assert!(matches!(
        one.unwrap(),
        CycleOutcome::Completed { submitted: 2, .. }
    ));
    assert!(matches!(
        two.unwrap(),
        CycleOutcome::Completed { submitted: 2, .. }
    ));

    // No nonce may be handed to two different rows for the same
    // (wallet, chain) pair, regardless of cycle interleaving
    let mut sent = network.sent_nonces();
    sent.sort_unstable();
    assert_eq!(sent, vec![0, 1, 2, 3]);

    let mut assigned: Vec<i64> = queue
        .all_rows()
        .iter()
        .filter_map(|row| row.nonce)
        .collect();
    assigned.sort_unstable();
    assert_eq!(assigned, vec![0, 1, 2, 3]);
    assert_eq!(queue.nonce(WALLET, CHAIN), Some(4));
}

#[tokio::test]
async fn test_low_wallet_balance_fires_one_throttled_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(MockQueueStore::new());
    let network = Arc::new(MockNetworkClient::new());
    let relay = Arc::new(MockRelayClient::new());
    let subscriptions = MockSubscriptionStore::new(vec![WebhookSubscription {
        event_kind: WebhookEventKind::WalletBalance,
        url: format!("{}/alerts", server.uri()),
        secret: None,
        active: true,
    }]);
    let dispatcher = dispatcher_over(
        &queue,
        &network,
        &relay,
        subscriptions,
        DispatcherConfig::default(),
    );

    // Well below the default 0.02 native-token minimum
    network.set_balance(100);
    queue.insert(queued_transaction("a", WALLET, CHAIN));
    queue.insert(queued_transaction(
        "b",
        "0x0000000000000000000000000000000000000b0b",
        CHAIN,
    ));

    let outcome = dispatcher.run_cycle().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Completed { submitted: 2, .. }
    ));

    // Both groups hit the low-balance condition; the process-wide
    // throttle lets exactly one alert through
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["currentBalance"], "100");
    assert_eq!(body["chainId"], CHAIN);
}
