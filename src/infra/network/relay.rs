//! User-operation relay (bundler) client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::domain::{AppError, NetworkError, RelayClient, SignedUserOperation};

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Vec<&'a SignedUserOperation>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    result: Option<serde_json::Value>,
    error: Option<RelayError>,
}

#[derive(Debug, Deserialize)]
struct RelayError {
    code: i64,
    message: String,
}

/// HTTP client for the configured relay endpoint
pub struct HttpRelayClient {
    url: String,
    http_client: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Network(NetworkError::Connection(e.to_string())))?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    #[instrument(skip(self, operation), fields(sender = %operation.operation.sender))]
    async fn send_user_operation(&self, operation: &SignedUserOperation) -> Result<(), AppError> {
        let request = RelayRequest {
            jsonrpc: "2.0",
            id: 0,
            method: "eth_sendUserOperation",
            params: vec![operation],
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(NetworkError::Connection(e.to_string())))?;

        let body: RelayResponse = response
            .json()
            .await
            .map_err(|e| AppError::Network(NetworkError::InvalidResponse(e.to_string())))?;

        if let Some(error) = body.error {
            warn!(code = error.code, message = %error.message, "Relay rejected user operation");
            return Err(AppError::Network(NetworkError::Rpc(error.message)));
        }
        if body.result.is_none() {
            return Err(AppError::Network(NetworkError::InvalidResponse(
                "relay returned neither result nor error".to_string(),
            )));
        }
        Ok(())
    }
}
