use std::{sync::Arc, time::Duration};

use alloy::providers::Provider;
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::{eip2718::Encodable2718, BlockId};
use alloy_primitives::{Address, Bytes, Signature, TxKind, U256};
use async_trait::async_trait;
use unilink_primitives::{Buf32, ChainRef};
use unilink_rpc_pool::RpcPool;
use unilink_types::{OutboundSigningRequest, ThresholdSignature, UniversalOutbound};

use crate::{
    errors::ChainError,
    evm::{with_endpoint, EvmClient},
    traits::{BroadcastVerification, OutboundTxBuilder},
};

/// Priority fee offered on EIP-1559 outbounds, capped by the max fee.
const PRIORITY_FEE_WEI: u128 = 1_500_000_000;

/// Builds, broadcasts and verifies EIP-1559 outbound transactions.
#[derive(Debug)]
pub struct EvmOutboundBuilder {
    chain_id: u64,
    pool: Arc<RpcPool<EvmClient>>,
    request_timeout: Duration,
}

impl EvmOutboundBuilder {
    pub fn new(
        chain: &ChainRef,
        pool: Arc<RpcPool<EvmClient>>,
        request_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let chain_id = chain
            .evm_chain_id()
            .ok_or_else(|| ChainError::InvalidRequest(format!("not an EVM chain: {chain}")))?;
        Ok(Self {
            chain_id,
            pool,
            request_timeout,
        })
    }

    /// Deterministically reconstructs the unsigned tx for an outbound, so
    /// the broadcast step needs no state carried over from signing.
    fn build_tx(
        &self,
        event: &UniversalOutbound,
        gas_price: u128,
        nonce: u64,
    ) -> Result<TxEip1559, ChainError> {
        let to: Address = event.recipient.parse().map_err(|err| {
            ChainError::InvalidRequest(format!("bad recipient {}: {err}", event.recipient))
        })?;

        let input = match &event.payload {
            Some(payload) => {
                let stripped = payload.strip_prefix("0x").unwrap_or(payload);
                hex::decode(stripped)
                    .map_err(|err| ChainError::InvalidRequest(format!("bad payload: {err}")))?
            }
            None => Vec::new(),
        };

        Ok(TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit: event.gas_limit,
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: PRIORITY_FEE_WEI.min(gas_price),
            to: TxKind::Call(to),
            value: event.amount,
            access_list: Default::default(),
            input: Bytes::from(input),
        })
    }
}

#[async_trait]
impl OutboundTxBuilder for EvmOutboundBuilder {
    async fn next_nonce(&self, signer: &str, use_finalized: bool) -> Result<u64, ChainError> {
        let address: Address = signer
            .parse()
            .map_err(|err| ChainError::InvalidRequest(format!("bad signer {signer}: {err}")))?;

        with_endpoint(
            &self.pool,
            self.request_timeout,
            "eth_getTransactionCount",
            move |client| async move {
                let block = if use_finalized {
                    BlockId::finalized()
                } else {
                    BlockId::pending()
                };
                client
                    .get_transaction_count(address)
                    .block_id(block)
                    .await
                    .map_err(ChainError::rpc)
            },
        )
        .await
    }

    async fn outbound_signing_request(
        &self,
        event: &UniversalOutbound,
        gas_price: u128,
        nonce: u64,
    ) -> Result<OutboundSigningRequest, ChainError> {
        let tx = self.build_tx(event, gas_price, nonce)?;
        let signing_hash = Buf32::new(tx.signature_hash().0);
        Ok(OutboundSigningRequest {
            signing_hash,
            nonce,
            gas_price,
        })
    }

    async fn broadcast_signed(
        &self,
        request: &OutboundSigningRequest,
        event: &UniversalOutbound,
        signature: &ThresholdSignature,
    ) -> Result<String, ChainError> {
        let tx = self.build_tx(event, request.gas_price, request.nonce)?;
        if Buf32::new(tx.signature_hash().0) != request.signing_hash {
            return Err(ChainError::UnknownSigningRequest(
                request.signing_hash.to_string(),
            ));
        }

        let (r, s) = signature.r_s().ok_or_else(|| {
            ChainError::SignatureMismatch(format!(
                "expected 64-byte signature, got {}",
                signature.signature.len()
            ))
        })?;
        let sig = Signature::new(
            U256::from_be_bytes(r),
            U256::from_be_bytes(s),
            signature.recovery_id == 1,
        );

        let signed = tx.into_signed(sig);
        let mut raw = Vec::new();
        TxEnvelope::Eip1559(signed).encode_2718(&mut raw);

        let tx_hash = with_endpoint(
            &self.pool,
            self.request_timeout,
            "eth_sendRawTransaction",
            move |client| async move {
                let pending = client
                    .send_raw_transaction(&raw)
                    .await
                    .map_err(ChainError::rpc)?;
                Ok(*pending.tx_hash())
            },
        )
        .await?;

        Ok(format!("{tx_hash:#x}"))
    }

    async fn verify_broadcasted(&self, tx_hash: &str) -> Result<BroadcastVerification, ChainError> {
        let hash = tx_hash
            .parse()
            .map_err(|err| ChainError::Decode(format!("bad tx hash: {err}")))?;

        let receipt = with_endpoint(
            &self.pool,
            self.request_timeout,
            "eth_getTransactionReceipt",
            move |client| async move {
                client
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(ChainError::rpc)
            },
        )
        .await?;

        let Some(receipt) = receipt else {
            return Ok(BroadcastVerification {
                found: false,
                confirmations: 0,
                block_height: 0,
                success: None,
            });
        };

        let tip = with_endpoint(
            &self.pool,
            self.request_timeout,
            "eth_blockNumber",
            |client| async move { client.get_block_number().await.map_err(ChainError::rpc) },
        )
        .await?;

        let block_height = receipt.block_number.unwrap_or(0);
        let confirmations = receipt
            .block_number
            .map(|mined| tip.saturating_sub(mined) + 1)
            .unwrap_or(0);

        Ok(BroadcastVerification {
            found: true,
            confirmations,
            block_height,
            success: Some(receipt.status()),
        })
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        with_endpoint(
            &self.pool,
            self.request_timeout,
            "eth_gasPrice",
            |client| async move { client.get_gas_price().await.map_err(ChainError::rpc) },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use unilink_config::{ChainDefaults, LoadBalancingStrategy};
    use unilink_rpc_pool::PoolConfig;

    use super::*;

    fn builder() -> EvmOutboundBuilder {
        let chain: ChainRef = "eip155:1".parse().unwrap();
        let defaults = ChainDefaults::default();
        let mut config = PoolConfig::from_chain_defaults(&defaults);
        config.strategy = LoadBalancingStrategy::RoundRobin;
        let pool = Arc::new(RpcPool::new(vec![], config));
        EvmOutboundBuilder::new(&chain, pool, Duration::from_secs(5)).unwrap()
    }

    fn outbound() -> UniversalOutbound {
        UniversalOutbound {
            tx_id: Buf32::new([0x31; 32]),
            universal_tx_id: Buf32::new([0x32; 32]),
            destination_chain: "eip155:1".parse().unwrap(),
            recipient: format!("0x{}", "42".repeat(20)),
            amount: U256::from(1_000u64),
            payload: Some("0xdeadbeef".into()),
            gas_limit: 100_000,
        }
    }

    #[tokio::test]
    async fn signing_request_is_deterministic() {
        let builder = builder();
        let event = outbound();

        let a = builder
            .outbound_signing_request(&event, 30_000_000_000, 7)
            .await
            .unwrap();
        let b = builder
            .outbound_signing_request(&event, 30_000_000_000, 7)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.nonce, 7);

        // nonce participates in the signing hash
        let c = builder
            .outbound_signing_request(&event, 30_000_000_000, 8)
            .await
            .unwrap();
        assert_ne!(a.signing_hash, c.signing_hash);
    }

    #[tokio::test]
    async fn rejects_bad_recipient() {
        let builder = builder();
        let mut event = outbound();
        event.recipient = "not-an-address".into();

        let err = builder
            .outbound_signing_request(&event, 1, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn broadcast_rejects_undersized_signature() {
        let builder = builder();
        let event = outbound();
        let request = builder
            .outbound_signing_request(&event, 1_000, 0)
            .await
            .unwrap();

        let bad_sig = ThresholdSignature {
            signature: vec![0u8; 63],
            recovery_id: 0,
        };
        let err = builder
            .broadcast_signed(&request, &event, &bad_sig)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::SignatureMismatch(_)));
    }

    #[tokio::test]
    async fn broadcast_rejects_stale_request() {
        let builder = builder();
        let event = outbound();
        let mut request = builder
            .outbound_signing_request(&event, 1_000, 0)
            .await
            .unwrap();
        request.signing_hash = Buf32::new([9u8; 32]);

        let sig = ThresholdSignature {
            signature: vec![0u8; 64],
            recovery_id: 0,
        };
        let err = builder
            .broadcast_signed(&request, &event, &sig)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::UnknownSigningRequest(_)));
    }
}
