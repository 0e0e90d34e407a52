use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, error, warn};
use unilink_common::Shutdown;
use unilink_db::ChainStore;
use unilink_primitives::{normalize_tx_hash, ChainRef};
use unilink_types::{
    EventEntry, EventStatus, GatewayEventPayload, InboundGatewayEvent, InboundVote,
    OutboundGatewayEvent, OutboundObservation, TxType, VerificationType,
};
use unilink_uchain::UniversalClient;

use crate::errors::ObserverError;

/// Poll cadence of the processor loop.
const PROCESS_INTERVAL: Duration = Duration::from_secs(5);

/// Max events pulled per pass.
const BATCH_LIMIT: usize = 1_000;

/// Processor progress snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessorStatus {
    pub voted: u64,
    pub failed: u64,
}

/// Turns confirmed observations into votes on the universal chain and
/// drives events to their terminal status.
#[derive(Debug)]
pub struct EventProcessor<S, U> {
    chain: ChainRef,
    store: Arc<S>,
    universal: Arc<U>,
    verification: VerificationType,
    voted: AtomicU64,
    failed: AtomicU64,
}

impl<S: ChainStore, U: UniversalClient> EventProcessor<S, U> {
    pub fn new(
        chain: ChainRef,
        store: Arc<S>,
        universal: Arc<U>,
        verification: VerificationType,
    ) -> Self {
        Self {
            chain,
            store,
            universal,
            verification,
            voted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            voted: self.voted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// One processing pass over the ready-to-vote backlog.
    pub async fn process_batch(&self) -> Result<(), ObserverError> {
        let batch = self.store.confirmed_events(BATCH_LIMIT)?;
        for event in batch {
            match self.process_event(&event).await {
                Ok(()) => {
                    self.voted.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) if err.is_terminal_for_event() => {
                    warn!(event_id = %event.event_id, %err, "event failed validation");
                    let rows = self.store.update_event_status(
                        &event.event_id,
                        EventStatus::Confirmed,
                        EventStatus::Failed,
                    )?;
                    if rows == 0 {
                        warn!(event_id = %event.event_id, "event already progressed");
                    }
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    // transient or consensus rejection: the event stays
                    // confirmed and is retried on a later pass
                    warn!(event_id = %event.event_id, %err, "vote submission failed, will retry");
                }
            }
        }
        Ok(())
    }

    async fn process_event(&self, event: &EventEntry) -> Result<(), ObserverError> {
        let payload = GatewayEventPayload::from_json(&event.payload)?;

        let (raw_hash, _) = event
            .event_id
            .rsplit_once(':')
            .ok_or_else(|| ObserverError::validation(&event.event_id, "malformed event id"))?;
        let tx_hash = normalize_tx_hash(raw_hash)
            .map_err(|err| ObserverError::validation(&event.event_id, err.to_string()))?;

        let vote_tx_hash = match payload {
            GatewayEventPayload::Inbound(inbound) => {
                let vote = self.build_inbound_vote(event, &inbound, tx_hash)?;
                self.universal.vote_inbound(vote).await?
            }
            GatewayEventPayload::Outbound(outbound) => {
                self.vote_outbound(event, &outbound, tx_hash).await?
            }
        };

        self.complete_event(&event.event_id, &vote_tx_hash)
    }

    fn build_inbound_vote(
        &self,
        event: &EventEntry,
        inbound: &InboundGatewayEvent,
        tx_hash: String,
    ) -> Result<InboundVote, ObserverError> {
        let tx_type = TxType::from_code(inbound.tx_type);

        let universal_payload = if tx_type.carries_payload() {
            let payload = inbound.universal_payload.clone().ok_or_else(|| {
                ObserverError::validation(&event.event_id, "payload-bearing event without payload")
            })?;
            Some(payload)
        } else {
            None
        };

        let recipient = if tx_type.carries_recipient() {
            let recipient = inbound.recipient.clone().ok_or_else(|| {
                ObserverError::validation(&event.event_id, "transfer without recipient")
            })?;
            Some(recipient)
        } else {
            None
        };

        let verification_data = match self.verification {
            VerificationType::UniversalTx => tx_hash.clone(),
            VerificationType::Payload => inbound.verification_data.clone().ok_or_else(|| {
                ObserverError::validation(&event.event_id, "missing verification data")
            })?,
        };

        Ok(InboundVote {
            source_chain: self.chain.clone(),
            tx_hash,
            sender: inbound.sender.clone(),
            amount: inbound.bridge_amount.clone(),
            asset_addr: inbound.bridge_token.clone(),
            log_index: inbound.log_index,
            tx_type,
            universal_payload,
            recipient,
            verification_data,
        })
    }

    async fn vote_outbound(
        &self,
        event: &EventEntry,
        outbound: &OutboundGatewayEvent,
        tx_hash: String,
    ) -> Result<String, ObserverError> {
        let observation = OutboundObservation {
            success: true,
            block_height: event.block_height,
            tx_hash,
            error_msg: outbound.error_msg.clone().unwrap_or_default(),
        };
        let vote_tx_hash = self
            .universal
            .vote_outbound(outbound.universal_tx_id, outbound.tx_id, observation)
            .await?;
        Ok(vote_tx_hash)
    }

    fn complete_event(&self, event_id: &str, vote_tx_hash: &str) -> Result<(), ObserverError> {
        let rows =
            self.store
                .update_event_status(event_id, EventStatus::Confirmed, EventStatus::Completed)?;
        if rows == 0 {
            warn!(event_id, "event already progressed by another worker");
        }

        // bookkeeping only; losing the vote hash is not worth re-voting
        if let Err(err) = self.store.update_vote_tx_hash(event_id, vote_tx_hash) {
            warn!(event_id, %err, "failed to record vote tx hash");
        }
        Ok(())
    }

    /// Runs the processor loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(PROCESS_INTERVAL);
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("event processor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.process_batch().await {
                error!(%err, "event processing pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unilink_db::SledChainStore;
    use unilink_primitives::Buf32;
    use unilink_types::{ConfirmationSpeed, EventKind};
    use unilink_uchain::{MockUniversalClient, UniversalClientError};

    use super::*;

    fn inbound_payload(tx_type: u8, with_payload: bool, with_recipient: bool) -> Vec<u8> {
        GatewayEventPayload::Inbound(InboundGatewayEvent {
            source_chain: "eip155:1".into(),
            log_index: 3,
            sender: "0x1111".into(),
            recipient: with_recipient.then(|| "0x2222".to_owned()),
            bridge_token: "0x3333".into(),
            bridge_amount: "1000".into(),
            universal_payload: with_payload.then(|| "0xbeef".to_owned()),
            verification_data: None,
            revert_fund_recipient: None,
            revert_msg: None,
            tx_type,
        })
        .to_json()
        .unwrap()
    }

    fn confirmed_event(id: &str, kind: EventKind, payload: Vec<u8>) -> EventEntry {
        let mut entry =
            EventEntry::new_pending(id, kind, 100, ConfirmationSpeed::Standard, payload, 0);
        entry.status = EventStatus::Confirmed;
        entry
    }

    fn processor(
        universal: MockUniversalClient,
        verification: VerificationType,
    ) -> (
        EventProcessor<SledChainStore, MockUniversalClient>,
        Arc<SledChainStore>,
    ) {
        let store = Arc::new(SledChainStore::temporary().unwrap());
        let processor = EventProcessor::new(
            "eip155:1".parse().unwrap(),
            store.clone(),
            Arc::new(universal),
            verification,
        );
        (processor, store)
    }

    fn event_id() -> String {
        format!("0x{}:3", "ab".repeat(32))
    }

    fn tx_hash() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    #[tokio::test]
    async fn inbound_funds_vote_completes_event() {
        let mut universal = MockUniversalClient::new();
        universal
            .expect_vote_inbound()
            .withf(|vote| {
                vote.tx_hash == format!("0x{}", "ab".repeat(32))
                    && vote.tx_type == TxType::Funds
                    && vote.recipient.as_deref() == Some("0x2222")
                    && vote.universal_payload.is_none()
                    && vote.verification_data == vote.tx_hash
                    && vote.log_index == 3
            })
            .times(1)
            .returning(|_| Ok("0xvote".to_owned()));

        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                inbound_payload(2, false, true),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();

        let stored = store.event(&event_id()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
        assert_eq!(stored.vote_tx_hash.as_deref(), Some("0xvote"));
        assert_eq!(processor.status().voted, 1);
    }

    #[tokio::test]
    async fn payload_bearing_vote_carries_payload() {
        let mut universal = MockUniversalClient::new();
        universal
            .expect_vote_inbound()
            .withf(|vote| {
                vote.tx_type == TxType::FundsAndPayload
                    && vote.universal_payload.as_deref() == Some("0xbeef")
                    && vote.recipient.is_none()
            })
            .times(1)
            .returning(|_| Ok("0xvote".to_owned()));

        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                inbound_payload(3, true, true),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Completed
        );
    }

    #[tokio::test]
    async fn missing_payload_fails_event() {
        let universal = MockUniversalClient::new();
        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                inbound_payload(3, false, true),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Failed
        );
        assert_eq!(processor.status().failed, 1);
    }

    #[tokio::test]
    async fn payload_verification_requires_verification_data() {
        let universal = MockUniversalClient::new();
        let (processor, store) = processor(universal, VerificationType::Payload);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                inbound_payload(2, false, true),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }

    #[tokio::test]
    async fn consensus_rejection_leaves_event_confirmed() {
        let mut universal = MockUniversalClient::new();
        universal
            .expect_vote_inbound()
            .times(1)
            .returning(|_| Err(UniversalClientError::VoteRejected("not in set".into())));

        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                inbound_payload(2, false, true),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Confirmed
        );
        assert_eq!(processor.status().voted, 0);
    }

    #[tokio::test]
    async fn malformed_payload_fails_event() {
        let universal = MockUniversalClient::new();
        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        store
            .insert_event_if_not_exists(confirmed_event(
                &event_id(),
                EventKind::Inbound,
                b"not json".to_vec(),
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Failed
        );
    }

    #[tokio::test]
    async fn outbound_vote_submits_observation() {
        let tx_id = Buf32::new([0x21; 32]);
        let universal_tx_id = Buf32::new([0x22; 32]);

        let mut universal = MockUniversalClient::new();
        universal
            .expect_vote_outbound()
            .withf(move |utx, tx, obs| {
                *utx == universal_tx_id
                    && *tx == tx_id
                    && obs.success
                    && obs.block_height == 100
                    && obs.error_msg.is_empty()
                    && obs.tx_hash == format!("0x{}", "ab".repeat(32))
            })
            .times(1)
            .returning(|_, _, _| Ok("0xoutvote".to_owned()));

        let (processor, store) = processor(universal, VerificationType::UniversalTx);
        let payload = GatewayEventPayload::Outbound(OutboundGatewayEvent {
            tx_id,
            universal_tx_id,
            error_msg: None,
        })
        .to_json()
        .unwrap();
        store
            .insert_event_if_not_exists(confirmed_event(&event_id(), EventKind::Outbound, payload))
            .unwrap();

        processor.process_batch().await.unwrap();

        let stored = store.event(&event_id()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
        assert_eq!(stored.vote_tx_hash.as_deref(), Some("0xoutvote"));
    }

    #[tokio::test]
    async fn only_confirmed_events_are_processed() {
        let universal = MockUniversalClient::new();
        let (processor, store) = processor(universal, VerificationType::UniversalTx);

        // still pending, must not be voted
        store
            .insert_event_if_not_exists(EventEntry::new_pending(
                event_id(),
                EventKind::Inbound,
                100,
                ConfirmationSpeed::Standard,
                inbound_payload(2, false, true),
                0,
            ))
            .unwrap();

        processor.process_batch().await.unwrap();
        assert_eq!(
            store.event(&event_id()).unwrap().unwrap().status,
            EventStatus::Pending
        );
    }
}
