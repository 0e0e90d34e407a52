use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use unilink_primitives::{normalize_tx_hash, Buf32};
use unilink_rpc_pool::RpcPool;
use unilink_types::{OutboundSigningRequest, ThresholdSignature, UniversalOutbound};

use crate::{
    call::with_pooled_endpoint,
    errors::ChainError,
    svm::SvmClient,
    traits::{BroadcastVerification, OutboundTxBuilder},
};

/// An unsigned message prepared for signing, bound to its blockhash.
#[derive(Clone, Debug)]
struct PreparedMessage {
    message: Vec<u8>,
    #[expect(dead_code, reason = "reported back through OutboundResult bookkeeping")]
    blockhash: String,
}

/// Builds, broadcasts and verifies blockhash-bound SVM transactions.
///
/// The message bytes must survive between signing-request construction and
/// broadcast (the blockhash baked into them cannot be re-fetched), so
/// prepared messages are cached by signing hash until broadcast.
#[derive(Debug)]
pub struct SvmOutboundBuilder {
    gateway_program: String,
    /// Base58 pubkey the threshold signer controls on this chain.
    signer_pubkey: String,
    pool: Arc<RpcPool<SvmClient>>,
    request_timeout: Duration,
    prepared: Mutex<HashMap<Buf32, PreparedMessage>>,
}

fn decode_pubkey(raw: &str) -> Result<[u8; 32], ChainError> {
    let bytes = bs58::decode(raw)
        .into_vec()
        .map_err(|err| ChainError::InvalidRequest(format!("bad pubkey {raw}: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::InvalidRequest(format!("pubkey {raw} is not 32 bytes")))
}

/// Solana compact-u16 length prefix.
fn shortvec_len(len: usize, out: &mut Vec<u8>) {
    let mut rem = len as u16;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Serializes a single-instruction legacy message transferring `amount`
/// lamports to `recipient` through the gateway program.
fn build_message(
    signer: &[u8; 32],
    recipient: &[u8; 32],
    program: &[u8; 32],
    blockhash: &[u8; 32],
    amount: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(128 + payload.len());

    // header: one required signature, no read-only signed accounts, the
    // program id is the single read-only unsigned account
    message.extend_from_slice(&[1, 0, 1]);

    shortvec_len(3, &mut message);
    message.extend_from_slice(signer);
    message.extend_from_slice(recipient);
    message.extend_from_slice(program);

    message.extend_from_slice(blockhash);

    let mut data = Vec::with_capacity(8 + payload.len());
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(payload);

    shortvec_len(1, &mut message);
    message.push(2); // program id index
    shortvec_len(2, &mut message);
    message.extend_from_slice(&[0, 1]); // signer, recipient
    shortvec_len(data.len(), &mut message);
    message.extend_from_slice(&data);

    message
}

fn signing_hash(message: &[u8]) -> Buf32 {
    let digest = Sha256::digest(message);
    Buf32::new(digest.into())
}

impl SvmOutboundBuilder {
    pub fn new(
        gateway_program: impl Into<String>,
        signer_pubkey: impl Into<String>,
        pool: Arc<RpcPool<SvmClient>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway_program: gateway_program.into(),
            signer_pubkey: signer_pubkey.into(),
            pool,
            request_timeout,
            prepared: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OutboundTxBuilder for SvmOutboundBuilder {
    /// SVM has no account nonce; the current slot stands in as a strictly
    /// increasing sequence token, with `use_finalized` selecting the
    /// finalized commitment.
    async fn next_nonce(&self, _signer: &str, use_finalized: bool) -> Result<u64, ChainError> {
        with_pooled_endpoint(&self.pool, self.request_timeout, "getSlot", move |client| {
            async move { client.get_slot(use_finalized).await }
        })
        .await
    }

    async fn outbound_signing_request(
        &self,
        event: &UniversalOutbound,
        gas_price: u128,
        nonce: u64,
    ) -> Result<OutboundSigningRequest, ChainError> {
        let signer = decode_pubkey(&self.signer_pubkey)?;
        let recipient = decode_pubkey(&event.recipient)?;
        let program = decode_pubkey(&self.gateway_program)?;

        let amount: u64 = event.amount.try_into().map_err(|_| {
            ChainError::InvalidRequest(format!("amount {} overflows lamports", event.amount))
        })?;
        let payload = match &event.payload {
            Some(payload) => {
                let stripped = payload.strip_prefix("0x").unwrap_or(payload);
                hex::decode(stripped)
                    .map_err(|err| ChainError::InvalidRequest(format!("bad payload: {err}")))?
            }
            None => Vec::new(),
        };

        let blockhash_str = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getLatestBlockhash",
            |client| async move { client.get_latest_blockhash().await },
        )
        .await?
        .blockhash;
        let blockhash: [u8; 32] = bs58::decode(&blockhash_str)
            .into_vec()
            .map_err(ChainError::decode)?
            .try_into()
            .map_err(|_| ChainError::Decode("blockhash is not 32 bytes".into()))?;

        let message = build_message(&signer, &recipient, &program, &blockhash, amount, &payload);
        let hash = signing_hash(&message);

        self.prepared.lock().insert(
            hash,
            PreparedMessage {
                message,
                blockhash: blockhash_str,
            },
        );

        Ok(OutboundSigningRequest {
            signing_hash: hash,
            nonce,
            gas_price,
        })
    }

    async fn broadcast_signed(
        &self,
        request: &OutboundSigningRequest,
        _event: &UniversalOutbound,
        signature: &ThresholdSignature,
    ) -> Result<String, ChainError> {
        let prepared = self
            .prepared
            .lock()
            .get(&request.signing_hash)
            .cloned()
            .ok_or_else(|| {
                ChainError::UnknownSigningRequest(request.signing_hash.to_string())
            })?;

        if signature.signature.len() != 64 {
            return Err(ChainError::SignatureMismatch(format!(
                "expected 64-byte signature, got {}",
                signature.signature.len()
            )));
        }

        let mut raw = Vec::with_capacity(1 + 64 + prepared.message.len());
        shortvec_len(1, &mut raw);
        raw.extend_from_slice(&signature.signature);
        raw.extend_from_slice(&prepared.message);
        let encoded = bs58::encode(raw).into_string();

        let submitted = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "sendTransaction",
            move |client| async move { client.send_transaction(&encoded).await },
        )
        .await?;

        self.prepared.lock().remove(&request.signing_hash);
        normalize_tx_hash(&submitted).map_err(ChainError::decode)
    }

    async fn verify_broadcasted(&self, tx_hash: &str) -> Result<BroadcastVerification, ChainError> {
        let stripped = tx_hash.strip_prefix("0x").unwrap_or(tx_hash);
        let bytes = hex::decode(stripped)
            .map_err(|err| ChainError::Decode(format!("bad tx hash: {err}")))?;
        let signature = bs58::encode(bytes).into_string();

        let tx = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getTransaction",
            move |client| async move { client.get_transaction(&signature).await },
        )
        .await?;

        let Some(tx) = tx else {
            return Ok(BroadcastVerification {
                found: false,
                confirmations: 0,
                block_height: 0,
                success: None,
            });
        };

        let tip = with_pooled_endpoint(&self.pool, self.request_timeout, "getSlot", |client| {
            async move { client.get_slot(false).await }
        })
        .await?;

        let success = tx.meta.map(|meta| meta.err.is_none());
        Ok(BroadcastVerification {
            found: true,
            confirmations: tip.saturating_sub(tx.slot) + 1,
            block_height: tx.slot,
            success,
        })
    }

    /// Median of the recent prioritization fees.
    async fn gas_price(&self) -> Result<u128, ChainError> {
        let mut fees: Vec<u64> = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getRecentPrioritizationFees",
            |client| async move { client.get_recent_prioritization_fees().await },
        )
        .await?
        .into_iter()
        .map(|fee| fee.prioritization_fee)
        .collect();

        if fees.is_empty() {
            return Ok(0);
        }
        fees.sort_unstable();
        Ok(fees[fees.len() / 2] as u128)
    }
}
