use std::collections::HashMap;

use unilink_types::{EventEntry, EventStatus, TrackedTx, TrackedTxStatus};

use crate::errors::DbResult;

/// Durable event + chain-height storage with atomic status transitions.
///
/// One store instance per external chain; event ids are unique within a
/// store. All multi-step updates are transactional and never leave partial
/// writes behind.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait ChainStore: Send + Sync + 'static {
    /// Last block whose events have been scanned and persisted.
    fn chain_height(&self) -> DbResult<u64>;

    /// Monotone max: heights at or below the current one are ignored.
    fn set_chain_height(&self, height: u64) -> DbResult<()>;

    /// Inserts the event unless its id already exists. Returns whether the
    /// event was inserted; `false` is the idempotent-replay outcome.
    fn insert_event_if_not_exists(&self, event: EventEntry) -> DbResult<bool>;

    fn event(&self, event_id: &str) -> DbResult<Option<EventEntry>>;

    /// Events awaiting confirmation, oldest first.
    fn pending_events(&self, limit: usize) -> DbResult<Vec<EventEntry>>;

    /// Events ready to vote (status `Confirmed`), oldest first.
    fn confirmed_events(&self, limit: usize) -> DbResult<Vec<EventEntry>>;

    /// Compare-and-swap on `(event_id, old_status)`. Returns rows affected;
    /// 0 means another worker already progressed the event.
    fn update_event_status(
        &self,
        event_id: &str,
        old_status: EventStatus,
        new_status: EventStatus,
    ) -> DbResult<u64>;

    /// Unconditional vote-tx-hash record.
    fn update_vote_tx_hash(&self, event_id: &str, vote_tx_hash: &str) -> DbResult<()>;

    /// Sets the stored confirmation count for an event (display/bookkeeping
    /// only; status transitions go through the CAS).
    fn update_event_confirmations(&self, event_id: &str, confirmations: u64) -> DbResult<()>;

    /// Non-terminal events with `0 < expiry_block_height <= current_block`,
    /// oldest first.
    fn expired_events(&self, current_block: u64, limit: usize) -> DbResult<Vec<EventEntry>>;

    /// Deletes events in `{Completed, Reverted, Expired}` with `updated_at`
    /// older than the cutoff (unix millis). Returns the number deleted.
    fn delete_terminal_events(&self, updated_before: i64) -> DbResult<u64>;

    /// Status -> count report across all stored events.
    fn event_counts(&self) -> DbResult<HashMap<String, u64>>;

    /// Flush hook invoked after successful deletions to reclaim space.
    fn checkpoint(&self) -> DbResult<()>;

    /// Inserts the tracked tx, or resets block number and counters of an
    /// existing row (reorg replay). Returns whether a new row was created;
    /// either way exactly one row exists for the hash afterwards.
    fn upsert_tracked_tx(&self, tx: TrackedTx) -> DbResult<bool>;

    fn tracked_tx(&self, tx_hash: &str) -> DbResult<Option<TrackedTx>>;

    /// All tracked txs still pending confirmation.
    fn pending_tracked_txs(&self) -> DbResult<Vec<TrackedTx>>;

    /// All tracked txs that reached their confirmation threshold. The store
    /// is per-chain, so this is already chain-scoped.
    fn confirmed_tracked_txs(&self) -> DbResult<Vec<TrackedTx>>;

    /// Writes a batch of tracked-tx rows in one transaction.
    fn put_tracked_txs(&self, txs: Vec<TrackedTx>) -> DbResult<()>;

    /// Sets a tracked tx's status; returns false if the hash is unknown.
    fn set_tracked_tx_status(&self, tx_hash: &str, status: TrackedTxStatus) -> DbResult<bool>;
}
