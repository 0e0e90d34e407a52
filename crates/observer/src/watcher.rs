use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{debug, error, info};
use unilink_chain::{GatewayObservation, GatewayOperations};
use unilink_common::Shutdown;
use unilink_db::ChainStore;
use unilink_types::{EventEntry, TrackedTx};

use crate::errors::ObserverError;

/// Watcher progress snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct WatcherStatus {
    pub last_height: u64,
    pub ingested_events: u64,
}

/// Ingests gateway observations into the chain store.
///
/// Replayed observations (reorg windows, restarts) are deduplicated by the
/// store's idempotent insert; the persisted chain height only moves
/// forward.
#[derive(Debug)]
pub struct EventWatcher<S, G> {
    store: Arc<S>,
    adapter: Arc<G>,
    /// Expiry delta from the chain registry; 0 disables expiry stamping.
    expiry_delta: u64,
    ingested: AtomicU64,
}

impl<S: ChainStore, G: GatewayOperations> EventWatcher<S, G> {
    pub fn new(store: Arc<S>, adapter: Arc<G>, expiry_delta: u64) -> Self {
        Self {
            store,
            adapter,
            expiry_delta,
            ingested: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            last_height: self.store.chain_height().unwrap_or(0),
            ingested_events: self.ingested.load(Ordering::Relaxed),
        }
    }

    /// Persists one observation: event row, tracked tx, chain height.
    pub fn ingest(&self, obs: GatewayObservation) -> Result<bool, ObserverError> {
        let expiry = if self.expiry_delta > 0 {
            obs.block_height + self.expiry_delta
        } else {
            0
        };

        let entry = EventEntry::new_pending(
            obs.event_id.clone(),
            obs.kind,
            obs.block_height,
            obs.confirmation,
            obs.payload.clone(),
            expiry,
        );

        let inserted = self.store.insert_event_if_not_exists(entry)?;
        if inserted {
            info!(event_id = %obs.event_id, height = obs.block_height, "new gateway event");
        } else {
            debug!(event_id = %obs.event_id, "replayed gateway event, already known");
        }

        // insert-or-reset: a replay at a new height restarts the counters
        self.store.upsert_tracked_tx(TrackedTx::new(
            obs.tx_hash,
            obs.block_height,
            obs.method,
            obs.event_id,
            obs.confirmation,
            obs.payload,
        ))?;

        self.store.set_chain_height(obs.block_height)?;
        if inserted {
            self.ingested.fetch_add(1, Ordering::Relaxed);
        }
        Ok(inserted)
    }

    /// Runs the ingestion loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<(), ObserverError> {
        let from = self.store.chain_height()?.saturating_add(1);
        let mut events = self
            .adapter
            .watch_gateway_events(from, shutdown.clone())
            .await?;
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("event watcher stopping");
                    return Ok(());
                }
                next = events.recv() => {
                    let Some(obs) = next else {
                        debug!("observation stream closed");
                        return Ok(());
                    };
                    if let Err(err) = self.ingest(obs) {
                        // storage failures here are retried via replay
                        error!(%err, "failed to ingest gateway event");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unilink_chain::MockGatewayOperations;
    use unilink_db::SledChainStore;
    use unilink_types::{ConfirmationSpeed, EventKind, EventStatus};

    use super::*;

    fn observation(id: &str, height: u64) -> GatewayObservation {
        GatewayObservation {
            event_id: format!("{id}:0"),
            kind: EventKind::Inbound,
            tx_hash: id.to_owned(),
            block_height: height,
            method: "addFunds".to_owned(),
            confirmation: ConfirmationSpeed::Standard,
            payload: b"{}".to_vec(),
        }
    }

    fn watcher(expiry: u64) -> (EventWatcher<SledChainStore, MockGatewayOperations>, Arc<SledChainStore>) {
        let store = Arc::new(SledChainStore::temporary().unwrap());
        let adapter = Arc::new(MockGatewayOperations::new());
        (EventWatcher::new(store.clone(), adapter, expiry), store)
    }

    #[test]
    fn ingest_persists_event_tx_and_height() {
        let (watcher, store) = watcher(0);

        assert!(watcher.ingest(observation("0xaa", 100)).unwrap());

        let event = store.event("0xaa:0").unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.expiry_block_height, 0);

        let tx = store.tracked_tx("0xaa").unwrap().unwrap();
        assert_eq!(tx.event_id, "0xaa:0");
        assert_eq!(tx.block_number, 100);

        assert_eq!(store.chain_height().unwrap(), 100);
    }

    #[test]
    fn ingest_stamps_expiry_from_registry_delta() {
        let (watcher, store) = watcher(50);
        watcher.ingest(observation("0xbb", 200)).unwrap();
        let event = store.event("0xbb:0").unwrap().unwrap();
        assert_eq!(event.expiry_block_height, 250);
    }

    #[test]
    fn replay_dedupes_but_resets_tracking() {
        let (watcher, store) = watcher(0);

        assert!(watcher.ingest(observation("0xcc", 100)).unwrap());

        // simulate tracker progress
        let mut tx = store.tracked_tx("0xcc").unwrap().unwrap();
        tx.confirmations = 5;
        store.put_tracked_txs(vec![tx]).unwrap();

        // replayed at a different height after a reorg
        assert!(!watcher.ingest(observation("0xcc", 103)).unwrap());

        let tx = store.tracked_tx("0xcc").unwrap().unwrap();
        assert_eq!(tx.block_number, 103);
        assert_eq!(tx.confirmations, 0);

        // height keeps its monotone max
        assert_eq!(store.chain_height().unwrap(), 103);
        assert_eq!(watcher.status().ingested_events, 1);
    }
}
