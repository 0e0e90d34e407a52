use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info};
use unilink_common::Shutdown;
use unilink_db::ChainStore;

use crate::errors::ObserverError;

/// Periodic retention-based purge of terminal events.
///
/// Runs one cleanup immediately at start, then on every tick. Deletion
/// failures are logged and retried next tick, never fatal.
#[derive(Debug)]
pub struct EventCleaner<S> {
    store: Arc<S>,
    cleanup_interval: Duration,
    retention_period: Duration,
}

impl<S: ChainStore> EventCleaner<S> {
    pub fn new(store: Arc<S>, cleanup_interval: Duration, retention_period: Duration) -> Self {
        Self {
            store,
            cleanup_interval,
            retention_period,
        }
    }

    /// One cleanup pass; returns the number of events purged.
    pub fn run_once(&self) -> Result<u64, ObserverError> {
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_period.as_millis() as i64;
        let deleted = self.store.delete_terminal_events(cutoff)?;
        if deleted > 0 {
            info!(deleted, "purged terminal events");
            // reclaim file space after a real deletion
            self.store.checkpoint()?;
        }
        Ok(deleted)
    }

    /// Runs the cleanup loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        // the first interval tick fires immediately, covering the initial
        // cleanup at start
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("event cleaner stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.run_once() {
                error!(%err, "event cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unilink_common::shutdown_pair;
    use unilink_db::SledChainStore;
    use unilink_types::{ConfirmationSpeed, EventEntry, EventKind, EventStatus};

    use super::*;

    fn old_terminal_event(id: &str) -> EventEntry {
        let mut entry = EventEntry::new_pending(
            id,
            EventKind::Inbound,
            1,
            ConfirmationSpeed::Standard,
            b"{}".to_vec(),
            0,
        );
        entry.status = EventStatus::Completed;
        entry.updated_at = 0; // far beyond any retention period
        entry
    }

    #[test]
    fn purges_old_terminal_events() {
        let store = Arc::new(SledChainStore::temporary().unwrap());
        store
            .insert_event_if_not_exists(old_terminal_event("0x01:0"))
            .unwrap();
        store
            .insert_event_if_not_exists(old_terminal_event("0x02:0"))
            .unwrap();
        // fresh event survives
        store
            .insert_event_if_not_exists(EventEntry::new_pending(
                "0x03:0",
                EventKind::Inbound,
                1,
                ConfirmationSpeed::Standard,
                b"{}".to_vec(),
                0,
            ))
            .unwrap();

        let cleaner = EventCleaner::new(store.clone(), Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(cleaner.run_once().unwrap(), 2);
        assert!(store.event("0x03:0").unwrap().is_some());

        // nothing left to purge
        assert_eq!(cleaner.run_once().unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = Arc::new(SledChainStore::temporary().unwrap());
        let cleaner = Arc::new(EventCleaner::new(
            store,
            Duration::from_millis(10),
            Duration::from_secs(60),
        ));

        let (signal, shutdown) = shutdown_pair();
        // triggering before the loop even starts is safe
        signal.trigger();
        signal.trigger();
        cleaner.run(shutdown).await;
    }
}
