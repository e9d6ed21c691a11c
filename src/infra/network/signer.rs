//! Remote signing service client.
//!
//! Key custody is out of process: populated transactions are POSTed to a
//! signer service which returns the signed payload. The engine never
//! touches private keys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

use crate::domain::{
    AppError, DispatchError, PreparedTransaction, SignedUserOperation, TransactionSigner,
    UserOperation,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignTransactionRequest<'a> {
    transaction: &'a PreparedTransaction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignTransactionResponse {
    signed_transaction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUserOperationRequest<'a> {
    signer_address: &'a str,
    operation: &'a UserOperation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUserOperationResponse {
    signature: String,
}

/// HTTP client for the external signer service
pub struct HttpSignerClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpSignerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Dispatch(DispatchError::SigningFailure(e.to_string())))?;
        Ok(Self {
            base_url: base_url.into(),
            http_client,
        })
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, AppError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Dispatch(DispatchError::SigningFailure(e.to_string())))?;

        if !response.status().is_success() {
            return Err(AppError::Dispatch(DispatchError::SigningFailure(format!(
                "signer service returned {}",
                response.status()
            ))));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| AppError::Dispatch(DispatchError::SigningFailure(e.to_string())))
    }
}

#[async_trait]
impl TransactionSigner for HttpSignerClient {
    #[instrument(skip(self, tx), fields(from = %tx.from, nonce = tx.nonce))]
    async fn sign_transaction(&self, tx: &PreparedTransaction) -> Result<String, AppError> {
        let response: SignTransactionResponse = self
            .post("/sign-transaction", &SignTransactionRequest { transaction: tx })
            .await?;
        Ok(response.signed_transaction)
    }

    #[instrument(skip(self, operation), fields(signer = %signer_address))]
    async fn sign_user_operation(
        &self,
        signer_address: &str,
        operation: &UserOperation,
    ) -> Result<SignedUserOperation, AppError> {
        let response: SignUserOperationResponse = self
            .post(
                "/sign-user-operation",
                &SignUserOperationRequest {
                    signer_address,
                    operation,
                },
            )
            .await?;
        Ok(SignedUserOperation {
            operation: operation.clone(),
            signature: response.signature,
        })
    }
}
