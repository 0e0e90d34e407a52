use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::errors::ChainError;

/// Thin JSON-RPC client for SVM-class chains.
#[derive(Clone, Debug)]
pub struct SvmClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    message: String,
}

/// Wrapper for responses that carry a commitment context.
#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

/// One entry from `getSignaturesForAddress`.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SignatureInfo {
    pub(crate) signature: String,
    pub(crate) slot: u64,
    pub(crate) err: Option<Value>,
}

/// Subset of `getTransaction` this client consumes.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TransactionInfo {
    pub(crate) slot: u64,
    pub(crate) meta: Option<TransactionMeta>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionMeta {
    pub(crate) err: Option<Value>,
    pub(crate) log_messages: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LatestBlockhash {
    pub(crate) blockhash: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrioritizationFee {
    pub(crate) prioritization_fee: u64,
}

impl SvmClient {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ChainError::rpc)?;
        Ok(Self {
            http,
            url: url.to_owned(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(ChainError::rpc)?;

        let rpc: RpcResponse<T> = response.json().await.map_err(ChainError::decode)?;
        if let Some(err) = rpc.error {
            return Err(ChainError::Rpc(format!("{method}: {}", err.message)));
        }
        rpc.result
            .ok_or_else(|| ChainError::Decode(format!("{method}: missing result")))
    }

    pub(crate) async fn get_slot(&self, finalized: bool) -> Result<u64, ChainError> {
        let commitment = if finalized { "finalized" } else { "confirmed" };
        self.call("getSlot", json!([{ "commitment": commitment }]))
            .await
    }

    pub(crate) async fn get_signatures_for_address(
        &self,
        address: &str,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, ChainError> {
        let mut options = json!({ "limit": limit });
        if let Some(until) = until {
            options["until"] = json!(until);
        }
        self.call("getSignaturesForAddress", json!([address, options]))
            .await
    }

    pub(crate) async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionInfo>, ChainError> {
        self.call(
            "getTransaction",
            json!([signature, { "encoding": "json", "maxSupportedTransactionVersion": 0 }]),
        )
        .await
    }

    pub(crate) async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, ChainError> {
        let wrapped: WithContext<LatestBlockhash> = self
            .call("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        Ok(wrapped.value)
    }

    pub(crate) async fn get_recent_prioritization_fees(
        &self,
    ) -> Result<Vec<PrioritizationFee>, ChainError> {
        self.call("getRecentPrioritizationFees", json!([[]])).await
    }

    pub(crate) async fn send_transaction(&self, tx_base58: &str) -> Result<String, ChainError> {
        self.call("sendTransaction", json!([tx_base58, { "encoding": "base58" }]))
            .await
    }
}
