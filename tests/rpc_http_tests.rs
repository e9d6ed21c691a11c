//! HTTP-based tests for the JSON-RPC network client.
//!
//! Uses `wiremock` to mock node responses for nonce reads, fee
//! estimation, and broadcast outcome classification.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use evm_tx_dispatcher::domain::{BroadcastOutcome, NetworkClient};
use evm_tx_dispatcher::infra::network::{JsonRpcNetworkClient, RpcClientConfig};

fn rpc_result(value: &str) -> serde_json::Value {
    json!({"jsonrpc": "2.0", "id": 0, "result": value})
}

fn rpc_error(code: i64, message: &str) -> serde_json::Value {
    json!({"jsonrpc": "2.0", "id": 0, "error": {"code": code, "message": message}})
}

async fn client_for(server: &MockServer) -> JsonRpcNetworkClient {
    JsonRpcNetworkClient::new(RpcClientConfig::new(server.uri())).unwrap()
}

#[tokio::test]
async fn test_pending_nonce_parses_hex_quantity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionCount"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result("0x2a")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_eq!(client.pending_nonce("0xwallet").await.unwrap(), 42);
}

#[tokio::test]
async fn test_broadcast_accepted_returns_hash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result("0xdeadbeef")))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let outcome = client.send_raw_transaction("0xsigned").await.unwrap();
    assert_eq!(
        outcome,
        BroadcastOutcome::Accepted {
            transaction_hash: "0xdeadbeef".to_string()
        }
    );
}

#[tokio::test]
async fn test_broadcast_classifies_stale_nonce_case_insensitively() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(rpc_error(-32000, "Nonce TOO LOW: next nonce 7")),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let outcome = client.send_raw_transaction("0xsigned").await.unwrap();
    assert!(matches!(outcome, BroadcastOutcome::StaleNonce { .. }));
}

#[tokio::test]
async fn test_broadcast_classifies_other_errors_as_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(rpc_error(-32000, "insufficient funds for gas * price + value")),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let outcome = client.send_raw_transaction("0xsigned").await.unwrap();
    match outcome {
        BroadcastOutcome::Rejected { message } => {
            assert!(message.contains("insufficient funds"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fee_estimate_falls_back_when_priority_fee_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_gasPrice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result("0x64")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_maxPriorityFeePerGas"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(rpc_error(-32601, "method not found")),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let fees = client.fee_estimate().await.unwrap();
    assert_eq!(fees.max_fee_per_gas, 100);
    assert_eq!(fees.max_priority_fee_per_gas, 100);
}

#[tokio::test]
async fn test_confirmation_lookup_for_unknown_transaction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": null})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let detail = client.transaction_confirmation("0xunknown").await.unwrap();
    assert!(detail.is_none());
}

#[tokio::test]
async fn test_confirmation_lookup_reads_block_number() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 0,
            "result": {"hash": "0xabc", "blockNumber": "0x10"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let detail = client
        .transaction_confirmation("0xabc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.block_number, 16);
    assert_eq!(detail.transaction_hash, "0xabc");
}
