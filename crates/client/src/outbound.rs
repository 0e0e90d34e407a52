use std::{collections::HashSet, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use unilink_chain::{BroadcastVerification, ChainError, OutboundTxBuilder};
use unilink_common::{retry_with_backoff, ExponentialBackoff, Shutdown};
use unilink_primitives::{Buf32, ChainRef};
use unilink_signer::ThresholdSigner;
use unilink_types::{
    OutboundObservation, OutboundSigningRequest, ThresholdSignature, UniversalOutbound,
};
use unilink_uchain::UniversalClient;

use crate::errors::ClientError;

/// Poll cadence of the pending-outbound feed.
const OUTBOUND_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Attempts polling the destination chain for an inclusion.
const VERIFY_MAX_ATTEMPTS: u32 = 30;

/// Settles outbound actions on their destination chain.
///
/// Single consumer per destination signer: outbounds are processed
/// sequentially so nonces are consumed strictly in ascending order.
#[derive(Debug)]
pub struct OutboundCoordinator<B, U, Sg> {
    chain: ChainRef,
    builder: Arc<B>,
    universal: Arc<U>,
    signer: Arc<Sg>,
    signer_id: String,
    /// Destination-chain account the threshold signer controls.
    signer_address: String,
    max_signature_wait: Duration,
    /// Outbounds settled this session, kept until the universal chain
    /// stops reporting them as pending.
    settled: Mutex<HashSet<Buf32>>,
}

impl<B, U, Sg> OutboundCoordinator<B, U, Sg>
where
    B: OutboundTxBuilder,
    U: UniversalClient,
    Sg: ThresholdSigner,
{
    pub fn new(
        chain: ChainRef,
        builder: Arc<B>,
        universal: Arc<U>,
        signer: Arc<Sg>,
        signer_id: impl Into<String>,
        signer_address: impl Into<String>,
        max_signature_wait: Duration,
    ) -> Self {
        Self {
            chain,
            builder,
            universal,
            signer,
            signer_id: signer_id.into(),
            signer_address: signer_address.into(),
            max_signature_wait,
            settled: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over the pending-outbound feed.
    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<(), ClientError> {
        let pending = self.universal.pending_outbounds(&self.chain).await?;
        for event in pending {
            if self.settled.lock().contains(&event.tx_id) {
                continue;
            }
            if shutdown.is_cancelled() {
                return Ok(());
            }

            match self.settle(&event, shutdown).await {
                Ok(()) => {
                    self.settled.lock().insert(event.tx_id);
                    info!(tx_id = %event.tx_id, "outbound settled and voted");
                }
                Err(err) => {
                    // retried on the next feed poll
                    warn!(tx_id = %event.tx_id, %err, "outbound settlement failed");
                }
            }
        }
        Ok(())
    }

    /// Builds, signs, broadcasts and verifies one outbound, then votes the
    /// observation back to the universal chain.
    async fn settle(
        &self,
        event: &UniversalOutbound,
        shutdown: &Shutdown,
    ) -> Result<(), ClientError> {
        let gas_price = self.builder.gas_price().await?;

        // first attempt seeds the nonce from the pending view; a stuck
        // signature retries against the finalized view to replace-by-fee
        let (request, signature) = match self.sign_attempt(event, gas_price, false).await? {
            Some(signed) => signed,
            None => {
                warn!(
                    tx_id = %event.tx_id,
                    "signature not produced in time, reseeding nonce from finalized block"
                );
                self.sign_attempt(event, gas_price, true)
                    .await?
                    .ok_or(ClientError::SignatureTimeout(event.tx_id))?
            }
        };

        let tx_hash = self
            .builder
            .broadcast_signed(&request, event, &signature)
            .await?;
        debug!(tx_id = %event.tx_id, %tx_hash, "outbound broadcasted");

        let verification = self.await_inclusion(&tx_hash, shutdown).await?;
        let success = verification.success.unwrap_or(false);

        let observation = OutboundObservation {
            success,
            block_height: verification.block_height,
            tx_hash,
            error_msg: if success {
                String::new()
            } else {
                "destination execution failed".to_owned()
            },
        };
        self.universal
            .vote_outbound(event.universal_tx_id, event.tx_id, observation)
            .await?;
        Ok(())
    }

    /// One nonce-seed + signing-request + signature round.
    ///
    /// Returns `None` when the signer missed the wait budget.
    async fn sign_attempt(
        &self,
        event: &UniversalOutbound,
        gas_price: u128,
        use_finalized: bool,
    ) -> Result<Option<(OutboundSigningRequest, ThresholdSignature)>, ClientError> {
        let nonce = self
            .builder
            .next_nonce(&self.signer_address, use_finalized)
            .await?;
        let request = self
            .builder
            .outbound_signing_request(event, gas_price, nonce)
            .await?;

        let signed = tokio::time::timeout(
            self.max_signature_wait,
            self.signer.sign(request.signing_hash, &self.signer_id),
        )
        .await;

        match signed {
            Ok(Ok(signature)) => Ok(Some((request, signature))),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(None),
        }
    }

    /// Polls the destination chain with backoff until the tx is observed.
    async fn await_inclusion(
        &self,
        tx_hash: &str,
        shutdown: &Shutdown,
    ) -> Result<BroadcastVerification, ClientError> {
        let builder = self.builder.clone();
        let hash = tx_hash.to_owned();

        retry_with_backoff(
            "outbound_verify",
            VERIFY_MAX_ATTEMPTS,
            &ExponentialBackoff::default(),
            shutdown,
            move || {
                let builder = builder.clone();
                let hash = hash.clone();
                async move {
                    let verification = builder.verify_broadcasted(&hash).await?;
                    if !verification.found || verification.confirmations == 0 {
                        return Err(ChainError::Rpc("tx not yet observed".into()));
                    }
                    Ok(verification)
                }
            },
        )
        .await
        .map_err(|_| ClientError::NotObserved(tx_hash.to_owned()))
    }

    /// Runs the coordinator loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(OUTBOUND_POLL_INTERVAL);
        let mut listener = shutdown.clone();
        loop {
            tokio::select! {
                _ = listener.cancelled() => {
                    debug!("outbound coordinator stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.poll_once(&shutdown).await {
                error!(%err, "pending outbound poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use async_trait::async_trait;
    use unilink_chain::MockOutboundTxBuilder;
    use unilink_common::shutdown_pair;
    use unilink_signer::{MockThresholdSigner, SignerError};
    use unilink_uchain::MockUniversalClient;

    use super::*;

    fn outbound_event() -> UniversalOutbound {
        UniversalOutbound {
            tx_id: Buf32::new([0x21; 32]),
            universal_tx_id: Buf32::new([0x22; 32]),
            destination_chain: "eip155:1".parse().unwrap(),
            recipient: format!("0x{}", "42".repeat(20)),
            amount: U256::from(1_000u64),
            payload: None,
            gas_limit: 100_000,
        }
    }

    fn request_for(nonce: u64) -> OutboundSigningRequest {
        OutboundSigningRequest {
            signing_hash: Buf32::new([nonce as u8; 32]),
            nonce,
            gas_price: 1_000,
        }
    }

    fn signature() -> ThresholdSignature {
        ThresholdSignature {
            signature: vec![7u8; 64],
            recovery_id: 1,
        }
    }

    #[tokio::test]
    async fn settles_and_votes_happy_path() {
        let mut builder = MockOutboundTxBuilder::new();
        builder.expect_gas_price().returning(|| Ok(1_000));
        builder
            .expect_next_nonce()
            .withf(|signer, finalized| signer == "0xsigner" && !finalized)
            .times(1)
            .returning(|_, _| Ok(7));
        builder
            .expect_outbound_signing_request()
            .withf(|_, gas, nonce| *gas == 1_000 && *nonce == 7)
            .returning(|_, gas, nonce| {
                Ok(OutboundSigningRequest {
                    signing_hash: Buf32::new([0x55; 32]),
                    nonce,
                    gas_price: gas,
                })
            });
        builder
            .expect_broadcast_signed()
            .times(1)
            .returning(|_, _, _| Ok("0xbroadcast".to_owned()));
        builder.expect_verify_broadcasted().returning(|_| {
            Ok(BroadcastVerification {
                found: true,
                confirmations: 2,
                block_height: 900,
                success: Some(true),
            })
        });

        let mut signer = MockThresholdSigner::new();
        signer
            .expect_sign()
            .withf(|hash, id| *hash == Buf32::new([0x55; 32]) && id == "validator-1")
            .times(1)
            .returning(|_, _| Ok(signature()));

        let mut universal = MockUniversalClient::new();
        universal
            .expect_pending_outbounds()
            .returning(|_| Ok(vec![outbound_event()]));
        universal
            .expect_vote_outbound()
            .withf(|utx, tx, obs| {
                *utx == Buf32::new([0x22; 32])
                    && *tx == Buf32::new([0x21; 32])
                    && obs.success
                    && obs.block_height == 900
                    && obs.tx_hash == "0xbroadcast"
            })
            .times(1)
            .returning(|_, _, _| Ok("0xvote".to_owned()));

        let coordinator = OutboundCoordinator::new(
            "eip155:1".parse().unwrap(),
            Arc::new(builder),
            Arc::new(universal),
            Arc::new(signer),
            "validator-1",
            "0xsigner",
            Duration::from_secs(5),
        );

        let (_signal, shutdown) = shutdown_pair();
        coordinator.poll_once(&shutdown).await.unwrap();

        // second pass: already settled, nothing re-broadcast
        coordinator.poll_once(&shutdown).await.unwrap();
    }

    /// Signer that misses the wait budget once, then responds.
    #[derive(Debug)]
    struct SlowThenFastSigner {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ThresholdSigner for SlowThenFastSigner {
        async fn sign(
            &self,
            _hash: Buf32,
            _signer_id: &str,
        ) -> Result<ThresholdSignature, SignerError> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call == 1 {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
            }
            Ok(signature())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_signature_reseeds_nonce_from_finalized() {
        let mut builder = MockOutboundTxBuilder::new();
        builder.expect_gas_price().returning(|| Ok(1_000));
        let mut seq = mockall::Sequence::new();
        builder
            .expect_next_nonce()
            .withf(|_, finalized| !finalized)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(7));
        builder
            .expect_next_nonce()
            .withf(|_, finalized| *finalized)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(5));
        builder
            .expect_outbound_signing_request()
            .returning(|_, _, nonce| Ok(request_for(nonce)));
        builder
            .expect_broadcast_signed()
            .withf(|request, _, _| request.nonce == 5)
            .times(1)
            .returning(|_, _, _| Ok("0xreplaced".to_owned()));
        builder.expect_verify_broadcasted().returning(|_| {
            Ok(BroadcastVerification {
                found: true,
                confirmations: 1,
                block_height: 901,
                success: Some(true),
            })
        });

        let mut universal = MockUniversalClient::new();
        universal
            .expect_pending_outbounds()
            .returning(|_| Ok(vec![outbound_event()]));
        universal
            .expect_vote_outbound()
            .times(1)
            .returning(|_, _, _| Ok("0xvote".to_owned()));

        let coordinator = OutboundCoordinator::new(
            "eip155:1".parse().unwrap(),
            Arc::new(builder),
            Arc::new(universal),
            Arc::new(SlowThenFastSigner {
                calls: Mutex::new(0),
            }),
            "validator-1",
            "0xsigner",
            Duration::from_secs(120),
        );

        let (_signal, shutdown) = shutdown_pair();
        coordinator.poll_once(&shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn failed_destination_execution_votes_failure() {
        let mut builder = MockOutboundTxBuilder::new();
        builder.expect_gas_price().returning(|| Ok(1_000));
        builder.expect_next_nonce().returning(|_, _| Ok(1));
        builder
            .expect_outbound_signing_request()
            .returning(|_, _, nonce| Ok(request_for(nonce)));
        builder
            .expect_broadcast_signed()
            .returning(|_, _, _| Ok("0xfailing".to_owned()));
        builder.expect_verify_broadcasted().returning(|_| {
            Ok(BroadcastVerification {
                found: true,
                confirmations: 1,
                block_height: 50,
                success: Some(false),
            })
        });

        let mut signer = MockThresholdSigner::new();
        signer.expect_sign().returning(|_, _| Ok(signature()));

        let mut universal = MockUniversalClient::new();
        universal
            .expect_pending_outbounds()
            .returning(|_| Ok(vec![outbound_event()]));
        universal
            .expect_vote_outbound()
            .withf(|_, _, obs| !obs.success && obs.error_msg == "destination execution failed")
            .times(1)
            .returning(|_, _, _| Ok("0xvote".to_owned()));

        let coordinator = OutboundCoordinator::new(
            "eip155:1".parse().unwrap(),
            Arc::new(builder),
            Arc::new(universal),
            Arc::new(signer),
            "validator-1",
            "0xsigner",
            Duration::from_secs(5),
        );

        let (_signal, shutdown) = shutdown_pair();
        coordinator.poll_once(&shutdown).await.unwrap();
    }
}
