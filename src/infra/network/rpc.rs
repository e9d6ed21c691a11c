//! JSON-RPC network client.
//!
//! Talks to an EVM node over plain HTTP JSON-RPC. Broadcast responses are
//! classified here so the dispatch loop never inspects raw error strings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::{
    AppError, BroadcastOutcome, ConfirmationDetail, FeeEstimate, NetworkClient, NetworkError,
};

/// Default gas limit assumed when the node gives no estimate
const DEFAULT_GAS_LIMIT: u64 = 120_000;

/// Configuration for a JSON-RPC network client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: String,
    pub request_timeout: Duration,
    /// Gas limit used in fee estimates; sized for simple transfers and
    /// typical contract calls
    pub default_gas_limit: u64,
}

impl RpcClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
            default_gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC implementation of [`NetworkClient`]
pub struct JsonRpcNetworkClient {
    config: RpcClientConfig,
    http_client: reqwest::Client,
}

impl JsonRpcNetworkClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Network(NetworkError::Connection(e.to_string())))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn call(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<JsonRpcResponse, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 0,
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(NetworkError::Connection(e.to_string())))?;

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| AppError::Network(NetworkError::InvalidResponse(e.to_string())))
    }

    /// Call a method and require a string result.
    async fn call_for_string(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<String, AppError> {
        let response = self.call(method, params).await?;
        if let Some(error) = response.error {
            return Err(AppError::Network(NetworkError::Rpc(format!(
                "{} ({})",
                error.message, error.code
            ))));
        }
        response
            .result
            .as_ref()
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Network(NetworkError::InvalidResponse(format!(
                    "{} returned no result",
                    method
                )))
            })
    }
}

/// Parse a 0x-prefixed hex quantity.
fn parse_hex_u128(value: &str) -> Result<u128, AppError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u128::from_str_radix(stripped, 16).map_err(|e| {
        AppError::Network(NetworkError::InvalidResponse(format!(
            "invalid hex quantity '{}': {}",
            value, e
        )))
    })
}

fn parse_hex_u64(value: &str) -> Result<u64, AppError> {
    let parsed = parse_hex_u128(value)?;
    u64::try_from(parsed).map_err(|_| {
        AppError::Network(NetworkError::InvalidResponse(format!(
            "quantity out of u64 range: {}",
            value
        )))
    })
}

#[async_trait]
impl NetworkClient for JsonRpcNetworkClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.call_for_string("eth_blockNumber", vec![]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_nonce(&self, address: &str) -> Result<u64, AppError> {
        let result = self
            .call_for_string(
                "eth_getTransactionCount",
                vec![address.into(), "pending".into()],
            )
            .await?;
        parse_hex_u64(&result)
    }

    #[instrument(skip(self))]
    async fn balance(&self, address: &str) -> Result<u128, AppError> {
        let result = self
            .call_for_string("eth_getBalance", vec![address.into(), "latest".into()])
            .await?;
        parse_hex_u128(&result)
    }

    #[instrument(skip(self))]
    async fn fee_estimate(&self) -> Result<FeeEstimate, AppError> {
        let gas_price = self.call_for_string("eth_gasPrice", vec![]).await?;
        let max_fee_per_gas = parse_hex_u128(&gas_price)?;

        // Not every node serves eth_maxPriorityFeePerGas; fall back to the
        // gas price for legacy chains.
        let max_priority_fee_per_gas =
            match self.call_for_string("eth_maxPriorityFeePerGas", vec![]).await {
                Ok(value) => parse_hex_u128(&value)?,
                Err(e) => {
                    debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, using gas price");
                    max_fee_per_gas
                }
            };

        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            gas_limit: self.config.default_gas_limit,
        })
    }

    #[instrument(skip(self, signed_payload))]
    async fn send_raw_transaction(
        &self,
        signed_payload: &str,
    ) -> Result<BroadcastOutcome, AppError> {
        let response = self
            .call("eth_sendRawTransaction", vec![signed_payload.into()])
            .await?;

        if let Some(error) = response.error {
            // Matched case-insensitively; node phrasing varies.
            if error.message.to_lowercase().contains("nonce too low") {
                return Ok(BroadcastOutcome::StaleNonce {
                    message: error.message,
                });
            }
            warn!(code = error.code, message = %error.message, "Broadcast rejected");
            return Ok(BroadcastOutcome::Rejected {
                message: error.message,
            });
        }

        match response.result.as_ref().and_then(|v| v.as_str()) {
            Some(hash) => Ok(BroadcastOutcome::Accepted {
                transaction_hash: hash.to_string(),
            }),
            None => Err(AppError::Network(NetworkError::InvalidResponse(
                "eth_sendRawTransaction returned neither result nor error".to_string(),
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn transaction_confirmation(
        &self,
        transaction_hash: &str,
    ) -> Result<Option<ConfirmationDetail>, AppError> {
        let response = self
            .call("eth_getTransactionByHash", vec![transaction_hash.into()])
            .await?;

        if let Some(error) = response.error {
            return Err(AppError::Network(NetworkError::Rpc(error.message)));
        }

        let Some(result) = response.result else {
            return Ok(None);
        };
        if result.is_null() {
            return Ok(None);
        }

        let block_number = match result.get("blockNumber").and_then(|v| v.as_str()) {
            Some(hex) => parse_hex_u64(hex)? as i64,
            // Known to the node but not yet included in a block
            None => self.block_number().await?,
        };

        Ok(Some(ConfirmationDetail {
            transaction_hash: transaction_hash.to_string(),
            block_number,
        }))
    }

    #[instrument(skip(self))]
    async fn block_number(&self) -> Result<i64, AppError> {
        let result = self.call_for_string("eth_blockNumber", vec![]).await?;
        Ok(parse_hex_u64(&result)? as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantities() {
        assert_eq!(parse_hex_u128("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u128("0x2a").unwrap(), 42);
        assert_eq!(parse_hex_u64("0xde0b6b3a7640000").unwrap(), 1_000_000_000_000_000_000);
        assert!(parse_hex_u128("0xzz").is_err());
        assert!(parse_hex_u64("0xffffffffffffffffff").is_err());
    }

    #[test]
    fn test_rpc_client_config_defaults() {
        let config = RpcClientConfig::new("http://localhost:8545");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.default_gas_limit, DEFAULT_GAS_LIMIT);
    }
}
