use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use unilink_chain::GatewayOperations;
use unilink_common::Shutdown;
use unilink_db::ChainStore;
use unilink_types::{ConfirmationSpeed, EventStatus, TrackedTx, TrackedTxStatus};

use crate::errors::ObserverError;

/// Batch size for the expiry sweep.
const EXPIRY_SWEEP_LIMIT: usize = 256;

/// Fast/standard confirmation thresholds from the chain registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ThresholdPair {
    pub fast: u64,
    pub standard: u64,
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self {
            fast: 5,
            standard: 12,
        }
    }
}

impl ThresholdPair {
    fn for_speed(&self, speed: ConfirmationSpeed) -> u64 {
        match speed {
            ConfirmationSpeed::Fast => self.fast,
            ConfirmationSpeed::Standard => self.standard,
        }
    }
}

/// Votes a confirmed tx to the universal chain and, on success, advances
/// its status itself (within the same store it owns a handle to).
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait VoteHandler: Send + Sync {
    async fn vote_and_confirm(&self, tx: &TrackedTx) -> Result<(), ObserverError>;
}

/// Stand-in for the unused handler slot when voting is owned by the
/// processor pipeline instead.
#[derive(Debug, Default)]
pub struct NoopVoteHandler;

#[async_trait]
impl VoteHandler for NoopVoteHandler {
    async fn vote_and_confirm(&self, _tx: &TrackedTx) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Tracker progress snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct TrackerStatus {
    pub thresholds: ThresholdPair,
    pub pending: u64,
    pub last_seen_block: u64,
}

/// Drives tracked transactions from pending to confirmed based on block
/// depth against registry thresholds.
#[derive(Debug)]
pub struct ConfirmationTracker<S, V> {
    store: Arc<S>,
    vote_handler: Option<Arc<V>>,
    thresholds: Mutex<ThresholdPair>,
    /// Highest threshold ever applied per tx; thresholds never decrease
    /// for a tx that is already tracked.
    applied: Mutex<HashMap<String, u64>>,
    last_seen_block: Mutex<u64>,
}

impl<S: ChainStore, V: VoteHandler> ConfirmationTracker<S, V> {
    pub fn new(store: Arc<S>, vote_handler: Option<Arc<V>>, thresholds: ThresholdPair) -> Self {
        Self {
            store,
            vote_handler,
            thresholds: Mutex::new(thresholds),
            applied: Mutex::new(HashMap::new()),
            last_seen_block: Mutex::new(0),
        }
    }

    /// Refreshes thresholds from the registry view.
    pub fn set_thresholds(&self, thresholds: ThresholdPair) {
        *self.thresholds.lock() = thresholds;
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            thresholds: *self.thresholds.lock(),
            pending: self
                .store
                .pending_tracked_txs()
                .map(|txs| txs.len() as u64)
                .unwrap_or(0),
            last_seen_block: *self.last_seen_block.lock(),
        }
    }

    /// Starts (or restarts, after a reorg replay) tracking a gateway tx.
    pub fn track_transaction(
        &self,
        tx_hash: &str,
        block_number: u64,
        method: &str,
        event_id: &str,
        confirmation: ConfirmationSpeed,
        data: Vec<u8>,
    ) -> Result<(), ObserverError> {
        self.store.upsert_tracked_tx(TrackedTx::new(
            tx_hash,
            block_number,
            method,
            event_id,
            confirmation,
            data,
        ))?;
        Ok(())
    }

    fn threshold_for(&self, tx: &TrackedTx) -> u64 {
        let current = self.thresholds.lock().for_speed(tx.confirmation);
        let mut applied = self.applied.lock();
        let entry = applied.entry(tx.tx_hash.clone()).or_insert(current);
        *entry = (*entry).max(current);
        *entry
    }

    /// Recomputes confirmation depth for every pending tx and advances the
    /// ones that reached their threshold. All row updates land in a single
    /// store transaction.
    pub async fn update_confirmations(&self, current_block: u64) -> Result<(), ObserverError> {
        *self.last_seen_block.lock() = current_block;

        let pending = self.store.pending_tracked_txs()?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut updates = Vec::with_capacity(pending.len());
        for mut tx in pending {
            if current_block < tx.block_number {
                // the chain view lags the recorded height, leave untouched
                continue;
            }
            tx.confirmations = current_block - tx.block_number;

            let threshold = self.threshold_for(&tx);
            if tx.confirmations >= threshold {
                if !self.advance_confirmed(&mut tx).await? {
                    // the handler wrote the row itself; don't clobber it
                    self.store
                        .update_event_confirmations(&tx.event_id, tx.confirmations)?;
                    continue;
                }
            } else if tx.confirmations > 0 {
                // surfaced for operators; the CAS miss is benign
                let _ = self.store.update_event_status(
                    &tx.event_id,
                    EventStatus::Pending,
                    EventStatus::ConfirmationPending,
                )?;
            }

            self.store
                .update_event_confirmations(&tx.event_id, tx.confirmations)?;
            updates.push(tx);
        }

        self.store.put_tracked_txs(updates)?;
        Ok(())
    }

    /// Threshold reached: hand off to the vote handler, or flip to
    /// confirmed directly when none is wired.
    ///
    /// Returns whether the caller should still write this row; a
    /// successful handler call owns the row itself.
    async fn advance_confirmed(&self, tx: &mut TrackedTx) -> Result<bool, ObserverError> {
        match &self.vote_handler {
            Some(handler) => match handler.vote_and_confirm(tx).await {
                Ok(()) => {
                    self.applied.lock().remove(&tx.tx_hash);
                    info!(tx_hash = %tx.tx_hash, "vote handler confirmed tx");
                    Ok(false)
                }
                Err(err) => {
                    // stays pending, retried on the next pass
                    warn!(tx_hash = %tx.tx_hash, %err, "vote handler failed, will retry");
                    Ok(true)
                }
            },
            None => {
                warn!(
                    tx_hash = %tx.tx_hash,
                    "no vote handler configured, marking confirmed directly"
                );
                tx.status = TrackedTxStatus::Confirmed;
                self.applied.lock().remove(&tx.tx_hash);
                self.mark_event_confirmed(&tx.event_id)?;
                Ok(true)
            }
        }
    }

    fn mark_event_confirmed(&self, event_id: &str) -> Result<(), ObserverError> {
        let rows = self.store.update_event_status(
            event_id,
            EventStatus::ConfirmationPending,
            EventStatus::Confirmed,
        )?;
        if rows == 0 {
            // the event may never have been surfaced as confirmation-pending
            let rows = self.store.update_event_status(
                event_id,
                EventStatus::Pending,
                EventStatus::Confirmed,
            )?;
            if rows == 0 {
                debug!(event_id, "event already progressed past confirmation");
            }
        }
        Ok(())
    }

    /// Whether the tx reached its confirmation threshold. A reorged tx is
    /// explicitly not confirmed.
    pub fn is_confirmed(&self, tx_hash: &str) -> Result<bool, ObserverError> {
        let status = self.store.tracked_tx(tx_hash)?.map(|tx| tx.status);
        Ok(status == Some(TrackedTxStatus::Confirmed))
    }

    pub fn mark_transaction_failed(&self, tx_hash: &str) -> Result<(), ObserverError> {
        self.store
            .set_tracked_tx_status(tx_hash, TrackedTxStatus::Failed)?;
        Ok(())
    }

    /// Marks partially confirmed txs that vanished from the canonical
    /// chain as reorged. A later replay of the observation resets them to
    /// pending; their events stay out of the voting path.
    async fn detect_reorgs<G: GatewayOperations>(
        &self,
        adapter: &G,
    ) -> Result<(), ObserverError> {
        for tx in self.store.pending_tracked_txs()? {
            if tx.confirmations == 0 {
                continue;
            }
            if adapter.transaction_confirmations(&tx.tx_hash).await? > 0 {
                continue;
            }

            warn!(tx_hash = %tx.tx_hash, "tracked tx no longer on canonical chain");
            self.store
                .set_tracked_tx_status(&tx.tx_hash, TrackedTxStatus::Reorged)?;
            self.applied.lock().remove(&tx.tx_hash);
            // benign misses when the event progressed concurrently
            for from in [EventStatus::Pending, EventStatus::ConfirmationPending] {
                let _ = self
                    .store
                    .update_event_status(&tx.event_id, from, EventStatus::Reorged)?;
            }
        }
        Ok(())
    }

    /// Expires non-terminal events whose expiry height has passed.
    fn sweep_expired(&self, current_block: u64) -> Result<(), ObserverError> {
        let expired = self
            .store
            .expired_events(current_block, EXPIRY_SWEEP_LIMIT)?;
        for event in expired {
            let rows =
                self.store
                    .update_event_status(&event.event_id, event.status, EventStatus::Expired)?;
            if rows > 0 {
                warn!(
                    event_id = %event.event_id,
                    expiry = event.expiry_block_height,
                    "event expired before completion"
                );
            }
        }
        Ok(())
    }

    /// Runs the confirmation loop until shutdown.
    pub async fn run<G: GatewayOperations>(
        self: Arc<Self>,
        adapter: Arc<G>,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("confirmation tracker stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let tip = match adapter.latest_block().await {
                Ok(tip) => tip,
                Err(err) => {
                    warn!(%err, "failed to fetch chain tip for confirmations");
                    continue;
                }
            };

            if let Err(err) = self.detect_reorgs(adapter.as_ref()).await {
                error!(%err, "reorg detection pass failed");
            }
            if let Err(err) = self.update_confirmations(tip).await {
                error!(%err, "confirmation update pass failed");
            }
            if let Err(err) = self.sweep_expired(tip) {
                error!(%err, "expiry sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unilink_db::SledChainStore;
    use unilink_types::{EventEntry, EventKind};

    use super::*;

    fn setup(
        handler: Option<MockVoteHandler>,
    ) -> (
        Arc<ConfirmationTracker<SledChainStore, MockVoteHandler>>,
        Arc<SledChainStore>,
    ) {
        let store = Arc::new(SledChainStore::temporary().unwrap());
        let tracker = Arc::new(ConfirmationTracker::new(
            store.clone(),
            handler.map(Arc::new),
            ThresholdPair::default(),
        ));
        (tracker, store)
    }

    fn seed_event(store: &SledChainStore, event_id: &str, speed: ConfirmationSpeed) {
        store
            .insert_event_if_not_exists(EventEntry::new_pending(
                event_id,
                EventKind::Inbound,
                100,
                speed,
                b"{}".to_vec(),
                0,
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn standard_tx_confirms_at_twelve() {
        let (tracker, store) = setup(None);
        seed_event(&store, "0xf9:0", ConfirmationSpeed::Standard);
        tracker
            .track_transaction(
                "0xabc",
                100,
                "addFunds",
                "0xf9:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();

        tracker.update_confirmations(105).await.unwrap();
        let tx = store.tracked_tx("0xabc").unwrap().unwrap();
        assert_eq!(tx.confirmations, 5);
        assert_eq!(tx.status, TrackedTxStatus::Pending);
        // partially confirmed events are surfaced as confirmation-pending
        assert_eq!(
            store.event("0xf9:0").unwrap().unwrap().status,
            EventStatus::ConfirmationPending
        );
        assert!(!tracker.is_confirmed("0xabc").unwrap());

        tracker.update_confirmations(112).await.unwrap();
        let tx = store.tracked_tx("0xabc").unwrap().unwrap();
        assert_eq!(tx.confirmations, 12);
        assert_eq!(tx.status, TrackedTxStatus::Confirmed);
        assert_eq!(
            store.event("0xf9:0").unwrap().unwrap().status,
            EventStatus::Confirmed
        );
        assert!(tracker.is_confirmed("0xabc").unwrap());
    }

    #[tokio::test]
    async fn fast_tx_confirms_at_five() {
        let (tracker, store) = setup(None);
        seed_event(&store, "0xaa:0", ConfirmationSpeed::Fast);
        tracker
            .track_transaction("0xdd", 200, "addFunds", "0xaa:0", ConfirmationSpeed::Fast, vec![])
            .unwrap();

        tracker.update_confirmations(204).await.unwrap();
        assert!(!tracker.is_confirmed("0xdd").unwrap());

        tracker.update_confirmations(205).await.unwrap();
        assert!(tracker.is_confirmed("0xdd").unwrap());
    }

    #[tokio::test]
    async fn lagging_tip_is_skipped() {
        let (tracker, store) = setup(None);
        tracker
            .track_transaction(
                "0xee",
                500,
                "addFunds",
                "0xee:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();

        // tip behind the recorded block: no negative confirmations
        tracker.update_confirmations(499).await.unwrap();
        let tx = store.tracked_tx("0xee").unwrap().unwrap();
        assert_eq!(tx.confirmations, 0);
        assert_eq!(tx.status, TrackedTxStatus::Pending);
    }

    #[tokio::test]
    async fn threshold_never_decreases_for_tracked_tx() {
        let (tracker, store) = setup(None);
        seed_event(&store, "0xbb:0", ConfirmationSpeed::Standard);
        tracker
            .track_transaction(
                "0xbb",
                100,
                "addFunds",
                "0xbb:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();

        // first pass pins the standard threshold of 12 to this tx
        tracker.update_confirmations(110).await.unwrap();
        assert!(!tracker.is_confirmed("0xbb").unwrap());

        // the registry lowering its threshold must not apply retroactively
        tracker.set_thresholds(ThresholdPair {
            fast: 2,
            standard: 8,
        });
        tracker.update_confirmations(110).await.unwrap();
        assert!(!tracker.is_confirmed("0xbb").unwrap());

        tracker.update_confirmations(112).await.unwrap();
        assert!(tracker.is_confirmed("0xbb").unwrap());
    }

    #[tokio::test]
    async fn vote_handler_owns_the_confirmation() {
        let mut handler = MockVoteHandler::new();
        handler
            .expect_vote_and_confirm()
            .withf(|tx| tx.tx_hash == "0xcc" && tx.confirmations == 12)
            .times(1)
            .returning(|_| Ok(()));

        let (tracker, store) = setup(Some(handler));
        tracker
            .track_transaction(
                "0xcc",
                100,
                "addFunds",
                "0xcc:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();

        tracker.update_confirmations(112).await.unwrap();

        // the tracker itself leaves the status alone; the handler owns it
        let tx = store.tracked_tx("0xcc").unwrap().unwrap();
        assert_eq!(tx.status, TrackedTxStatus::Pending);
    }

    #[tokio::test]
    async fn failed_vote_handler_leaves_tx_pending_for_retry() {
        let mut handler = MockVoteHandler::new();
        handler
            .expect_vote_and_confirm()
            .times(2)
            .returning(|tx| Err(ObserverError::validation(&tx.event_id, "consensus rejected")));

        let (tracker, store) = setup(Some(handler));
        tracker
            .track_transaction(
                "0xdd",
                100,
                "addFunds",
                "0xdd:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();

        tracker.update_confirmations(112).await.unwrap();
        // still pending, so the next pass retries the handler
        tracker.update_confirmations(113).await.unwrap();

        let tx = store.tracked_tx("0xdd").unwrap().unwrap();
        assert_eq!(tx.status, TrackedTxStatus::Pending);
    }

    #[tokio::test]
    async fn reorged_tx_is_not_confirmed() {
        let (tracker, store) = setup(None);
        tracker
            .track_transaction(
                "0xff",
                100,
                "addFunds",
                "0xff:0",
                ConfirmationSpeed::Fast,
                vec![],
            )
            .unwrap();
        store
            .set_tracked_tx_status("0xff", TrackedTxStatus::Reorged)
            .unwrap();

        assert!(!tracker.is_confirmed("0xff").unwrap());
    }

    #[tokio::test]
    async fn expiry_sweep_expires_overdue_events() {
        let (tracker, store) = setup(None);
        let mut entry = EventEntry::new_pending(
            "0x99:0",
            EventKind::Inbound,
            100,
            ConfirmationSpeed::Standard,
            b"{}".to_vec(),
            150,
        );
        entry.status = EventStatus::ConfirmationPending;
        store.insert_event_if_not_exists(entry).unwrap();

        tracker.sweep_expired(149).unwrap();
        assert_eq!(
            store.event("0x99:0").unwrap().unwrap().status,
            EventStatus::ConfirmationPending
        );

        tracker.sweep_expired(150).unwrap();
        assert_eq!(
            store.event("0x99:0").unwrap().unwrap().status,
            EventStatus::Expired
        );
    }

    #[tokio::test]
    async fn vanished_tx_is_marked_reorged() {
        use unilink_chain::MockGatewayOperations;

        let (tracker, store) = setup(None);
        seed_event(&store, "0x77:0", ConfirmationSpeed::Standard);
        tracker
            .track_transaction(
                "0x77",
                100,
                "addFunds",
                "0x77:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();
        tracker.update_confirmations(105).await.unwrap();

        let mut adapter = MockGatewayOperations::new();
        adapter
            .expect_transaction_confirmations()
            .withf(|hash| hash == "0x77")
            .returning(|_| Ok(0));

        tracker.detect_reorgs(&adapter).await.unwrap();

        assert_eq!(
            store.tracked_tx("0x77").unwrap().unwrap().status,
            TrackedTxStatus::Reorged
        );
        assert_eq!(
            store.event("0x77:0").unwrap().unwrap().status,
            EventStatus::Reorged
        );
        // reorged is explicitly not confirmed
        assert!(!tracker.is_confirmed("0x77").unwrap());

        // a replayed observation puts the tx back into tracking
        tracker
            .track_transaction(
                "0x77",
                103,
                "addFunds",
                "0x77:0",
                ConfirmationSpeed::Standard,
                vec![],
            )
            .unwrap();
        assert_eq!(
            store.tracked_tx("0x77").unwrap().unwrap().status,
            TrackedTxStatus::Pending
        );
    }

    #[tokio::test]
    async fn mark_transaction_failed_sets_status() {
        let (tracker, store) = setup(None);
        tracker
            .track_transaction(
                "0x11",
                100,
                "addFunds",
                "0x11:0",
                ConfirmationSpeed::Fast,
                vec![],
            )
            .unwrap();

        tracker.mark_transaction_failed("0x11").unwrap();
        assert_eq!(
            store.tracked_tx("0x11").unwrap().unwrap().status,
            TrackedTxStatus::Failed
        );
    }
}
