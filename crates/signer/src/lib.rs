//! Capability interface for the external threshold-signing service.

use async_trait::async_trait;
use jsonrpsee::{
    core::{client::Error as ClientError, RpcResult},
    http_client::{HttpClient, HttpClientBuilder},
    proc_macros::rpc,
};
use thiserror::Error;
use unilink_common::RetryableError;
use unilink_primitives::Buf32;
use unilink_types::ThresholdSignature;

/// Errors talking to the signing service.
#[derive(Debug, Clone, Error)]
pub enum SignerError {
    #[error("signer rpc: {0}")]
    Rpc(String),

    /// The service refused to sign; not retryable.
    #[error("signing rejected: {0}")]
    Rejected(String),
}

impl SignerError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl RetryableError for SignerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

/// Blocking, cancelable signing capability.
///
/// One process-wide instance, shared by reference across chain clients.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ThresholdSigner: Send + Sync {
    /// Signs a 32-byte hash under the validator's signer id. Returns the
    /// 64-byte signature and recovery id.
    async fn sign(
        &self,
        signing_hash: Buf32,
        signer_id: &str,
    ) -> Result<ThresholdSignature, SignerError>;
}

#[rpc(client, namespace = "signer")]
trait SignerApi {
    #[method(name = "sign")]
    async fn sign(&self, signing_hash: Buf32, signer_id: String) -> RpcResult<ThresholdSignature>;
}

/// JSON-RPC client for the signing service.
#[derive(Debug)]
pub struct RpcThresholdSigner {
    client: HttpClient,
}

impl RpcThresholdSigner {
    pub fn try_new(url: impl AsRef<str>) -> Result<Self, SignerError> {
        let client = HttpClientBuilder::default()
            .build(url.as_ref())
            .map_err(SignerError::rpc)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ThresholdSigner for RpcThresholdSigner {
    async fn sign(
        &self,
        signing_hash: Buf32,
        signer_id: &str,
    ) -> Result<ThresholdSignature, SignerError> {
        let signature = SignerApiClient::sign(&self.client, signing_hash, signer_id.to_owned())
            .await
            .map_err(|err| match err {
                ClientError::Call(call) => SignerError::Rejected(call.message().to_owned()),
                other => SignerError::rpc(other),
            })?;

        if signature.signature.len() != 64 {
            return Err(SignerError::Rejected(format!(
                "signer returned {}-byte signature",
                signature.signature.len()
            )));
        }
        Ok(signature)
    }
}
