use async_trait::async_trait;
use jsonrpsee::{
    core::{
        client::{ClientT, Error as RpcError},
        RpcResult,
    },
    http_client::{HttpClient, HttpClientBuilder},
    proc_macros::rpc,
    ws_client::{WsClient, WsClientBuilder},
};
use unilink_common::{retry_with_backoff, ExponentialBackoff, Shutdown};
use unilink_primitives::{Buf32, ChainRef};
use unilink_types::{
    ChainRegistryEntry, GasPriceVote, InboundVote, OutboundObservation, UniversalOutbound,
};

use crate::traits::{UniversalClient, UniversalClientError};

/// Max retries for ordinary universal-chain calls.
const DEFAULT_RPC_MAX_RETRIES: u32 = 5;

#[rpc(client, namespace = "uchain")]
trait UniversalApi {
    #[method(name = "voteInbound")]
    async fn vote_inbound(&self, vote: InboundVote) -> RpcResult<String>;

    #[method(name = "voteOutbound")]
    async fn vote_outbound(
        &self,
        universal_tx_id: Buf32,
        tx_id: Buf32,
        observation: OutboundObservation,
    ) -> RpcResult<String>;

    #[method(name = "voteGasPrice")]
    async fn vote_gas_price(&self, vote: GasPriceVote) -> RpcResult<String>;

    #[method(name = "getChainRegistry")]
    async fn get_chain_registry(&self, chain: ChainRef) -> RpcResult<ChainRegistryEntry>;

    #[method(name = "isValidator")]
    async fn is_validator(&self, signer_id: String) -> RpcResult<bool>;

    #[method(name = "getPendingOutbounds")]
    async fn get_pending_outbounds(&self, chain: ChainRef) -> RpcResult<Vec<UniversalOutbound>>;
}

/// Transport selected from the configured universal-chain URL.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportScheme {
    Http,
    Ws,
}

/// Resolves the transport for a universal-chain URL.
///
/// Bare `host:port` values are taken as the node's websocket endpoint.
/// Returns the scheme together with the URL to actually dial.
pub fn resolve_transport(url: &str) -> Result<(TransportScheme, String), UniversalClientError> {
    match url.split_once("://") {
        Some(("http" | "https", _)) => Ok((TransportScheme::Http, url.to_owned())),
        Some(("ws" | "wss", _)) => Ok((TransportScheme::Ws, url.to_owned())),
        Some((scheme, _)) => Err(UniversalClientError::rpc(format!(
            "unsupported universal chain RPC scheme: {scheme:?}"
        ))),
        None => Ok((TransportScheme::Ws, format!("ws://{url}"))),
    }
}

/// A query failure is transient from this client's point of view; the
/// caller's retry policy decides how long to keep trying.
fn classify_query_error(err: RpcError) -> UniversalClientError {
    match err {
        RpcError::Call(call) => {
            UniversalClientError::rpc(format!("{} (code {})", call.message(), call.code()))
        }
        RpcError::RequestTimeout | RpcError::Transport(_) | RpcError::RestartNeeded(_) => {
            UniversalClientError::network(err.to_string())
        }
        other => UniversalClientError::rpc(other.to_string()),
    }
}

/// Vote submissions additionally distinguish consensus rejections: the
/// chain evaluated the vote and refused it, so resubmitting the same
/// payload cannot succeed and the event is left for a later observation
/// pass instead.
fn classify_vote_error(err: RpcError) -> UniversalClientError {
    match err {
        RpcError::Call(call) => UniversalClientError::VoteRejected(call.message().to_owned()),
        other => classify_query_error(other),
    }
}

/// RPC-backed universal-chain client with retrying submissions.
///
/// Generic over the jsonrpsee transport; [`resolve_transport`] picks the
/// concrete connect path from the configured URL.
#[derive(Debug)]
pub struct RpcUniversalClient<C> {
    client: C,
    backoff: ExponentialBackoff,
    shutdown: Shutdown,
}

impl<C> RpcUniversalClient<C>
where
    C: ClientT + Send + Sync,
{
    fn new(client: C, shutdown: Shutdown) -> Self {
        Self {
            client,
            backoff: ExponentialBackoff::default(),
            shutdown,
        }
    }
}

impl RpcUniversalClient<HttpClient> {
    /// Connects over HTTP; `url` must be http(s).
    pub fn connect_http(
        url: impl AsRef<str>,
        shutdown: Shutdown,
    ) -> Result<Self, UniversalClientError> {
        let client = HttpClientBuilder::default()
            .build(url.as_ref())
            .map_err(classify_query_error)?;
        Ok(Self::new(client, shutdown))
    }
}

impl RpcUniversalClient<WsClient> {
    /// Connects over WebSocket; `url` must be ws(s).
    pub async fn connect_ws(
        url: impl AsRef<str>,
        shutdown: Shutdown,
    ) -> Result<Self, UniversalClientError> {
        let client = WsClientBuilder::default()
            .build(url.as_ref())
            .await
            .map_err(classify_query_error)?;
        Ok(Self::new(client, shutdown))
    }
}

#[async_trait]
impl<C> UniversalClient for RpcUniversalClient<C>
where
    C: ClientT + Send + Sync + 'static,
{
    async fn vote_inbound(&self, vote: InboundVote) -> Result<String, UniversalClientError> {
        retry_with_backoff(
            "uchain_vote_inbound",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .vote_inbound(vote.clone())
                    .await
                    .map_err(classify_vote_error)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn vote_outbound(
        &self,
        universal_tx_id: Buf32,
        tx_id: Buf32,
        observation: OutboundObservation,
    ) -> Result<String, UniversalClientError> {
        retry_with_backoff(
            "uchain_vote_outbound",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .vote_outbound(universal_tx_id, tx_id, observation.clone())
                    .await
                    .map_err(classify_vote_error)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn vote_gas_price(&self, vote: GasPriceVote) -> Result<String, UniversalClientError> {
        retry_with_backoff(
            "uchain_vote_gas_price",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .vote_gas_price(vote.clone())
                    .await
                    .map_err(classify_vote_error)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn chain_registry(
        &self,
        chain: &ChainRef,
    ) -> Result<ChainRegistryEntry, UniversalClientError> {
        retry_with_backoff(
            "uchain_chain_registry",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .get_chain_registry(chain.clone())
                    .await
                    .map_err(classify_query_error)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn is_validator(&self, signer_id: &str) -> Result<bool, UniversalClientError> {
        retry_with_backoff(
            "uchain_is_validator",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .is_validator(signer_id.to_owned())
                    .await
                    .map_err(classify_query_error)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn pending_outbounds(
        &self,
        chain: &ChainRef,
    ) -> Result<Vec<UniversalOutbound>, UniversalClientError> {
        retry_with_backoff(
            "uchain_pending_outbounds",
            DEFAULT_RPC_MAX_RETRIES,
            &self.backoff,
            &self.shutdown,
            || async {
                self.client
                    .get_pending_outbounds(chain.clone())
                    .await
                    .map_err(classify_query_error)
            },
        )
        .await
        .map_err(Into::into)
    }
}
