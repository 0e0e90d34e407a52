use std::{collections::HashMap, path::Path};

use borsh::{BorshDeserialize, BorshSerialize};
use sled::{
    transaction::{ConflictableTransactionError, TransactionError},
    Tree,
};
use tracing::debug;
use unilink_types::{EventEntry, EventStatus, TrackedTx, TrackedTxStatus};

use crate::{
    errors::{DbError, DbResult},
    traits::ChainStore,
};

const STATE_TREE: &str = "state";
const EVENTS_TREE: &str = "events";
const TXS_TREE: &str = "chain_transactions";

const CHAIN_HEIGHT_KEY: &[u8] = b"chain_height";

/// Sled-backed [`ChainStore`], one database file per external chain.
#[derive(Debug)]
pub struct SledChainStore {
    db: sled::Db,
    state: Tree,
    events: Tree,
    txs: Tree,
}

impl SledChainStore {
    pub fn new(db: sled::Db) -> DbResult<Self> {
        let state = db.open_tree(STATE_TREE)?;
        let events = db.open_tree(EVENTS_TREE)?;
        let txs = db.open_tree(TXS_TREE)?;
        Ok(Self {
            db,
            state,
            events,
            txs,
        })
    }

    /// Opens (or creates) the chain database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::new(sled::open(path)?)
    }

    /// In-memory store for tests.
    pub fn temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(db)
    }

    fn scan_events<F>(&self, mut pred: F) -> DbResult<Vec<EventEntry>>
    where
        F: FnMut(&EventEntry) -> bool,
    {
        let mut out = Vec::new();
        for item in self.events.iter() {
            let (_, raw) = item?;
            let entry: EventEntry = decode(&raw)?;
            if pred(&entry) {
                out.push(entry);
            }
        }
        // oldest first; ids break timestamp ties deterministically
        out.sort_by(|a, b| {
            (a.created_at, &a.event_id).cmp(&(b.created_at, &b.event_id))
        });
        Ok(out)
    }

    fn scan_txs<F>(&self, mut pred: F) -> DbResult<Vec<TrackedTx>>
    where
        F: FnMut(&TrackedTx) -> bool,
    {
        let mut out = Vec::new();
        for item in self.txs.iter() {
            let (_, raw) = item?;
            let tx: TrackedTx = decode(&raw)?;
            if pred(&tx) {
                out.push(tx);
            }
        }
        Ok(out)
    }
}

fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, DbError> {
    borsh::to_vec(value).map_err(DbError::codec)
}

fn decode<T: BorshDeserialize>(raw: &[u8]) -> Result<T, DbError> {
    T::try_from_slice(raw).map_err(DbError::codec)
}

fn abort<T>(err: DbError) -> Result<T, ConflictableTransactionError<DbError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn tx_encode<T: BorshSerialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<DbError>> {
    encode(value).or_else(abort)
}

fn tx_decode<T: BorshDeserialize>(
    raw: &[u8],
) -> Result<T, ConflictableTransactionError<DbError>> {
    decode(raw).or_else(abort)
}

impl ChainStore for SledChainStore {
    fn chain_height(&self) -> DbResult<u64> {
        match self.state.get(CHAIN_HEIGHT_KEY)? {
            Some(raw) => decode(&raw),
            None => Ok(0),
        }
    }

    fn set_chain_height(&self, height: u64) -> DbResult<()> {
        let result: Result<(), TransactionError<DbError>> = self.state.transaction(|tree| {
            let current = match tree.get(CHAIN_HEIGHT_KEY)? {
                Some(raw) => tx_decode::<u64>(&raw)?,
                None => 0,
            };
            if height > current {
                tree.insert(CHAIN_HEIGHT_KEY, tx_encode(&height)?)?;
            }
            Ok(())
        });
        result.map_err(Into::into)
    }

    fn insert_event_if_not_exists(&self, event: EventEntry) -> DbResult<bool> {
        let key = event.event_id.as_bytes().to_vec();
        let result: Result<bool, TransactionError<DbError>> = self.events.transaction(|tree| {
            if tree.get(&key)?.is_some() {
                return Ok(false);
            }
            tree.insert(key.clone(), tx_encode(&event)?)?;
            Ok(true)
        });
        result.map_err(Into::into)
    }

    fn event(&self, event_id: &str) -> DbResult<Option<EventEntry>> {
        match self.events.get(event_id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn pending_events(&self, limit: usize) -> DbResult<Vec<EventEntry>> {
        let mut events = self.scan_events(|e| {
            matches!(
                e.status,
                EventStatus::Pending | EventStatus::ConfirmationPending
            )
        })?;
        events.truncate(limit);
        Ok(events)
    }

    fn confirmed_events(&self, limit: usize) -> DbResult<Vec<EventEntry>> {
        let mut events = self.scan_events(|e| e.status == EventStatus::Confirmed)?;
        events.truncate(limit);
        Ok(events)
    }

    fn update_event_status(
        &self,
        event_id: &str,
        old_status: EventStatus,
        new_status: EventStatus,
    ) -> DbResult<u64> {
        let key = event_id.as_bytes().to_vec();
        let result: Result<u64, TransactionError<DbError>> = self.events.transaction(|tree| {
            let Some(raw) = tree.get(&key)? else {
                return Ok(0);
            };
            let mut entry: EventEntry = tx_decode(&raw)?;
            if entry.status != old_status {
                // another worker already progressed this event
                return Ok(0);
            }
            entry.status = new_status;
            entry.touch();
            tree.insert(key.clone(), tx_encode(&entry)?)?;
            Ok(1)
        });
        result.map_err(Into::into)
    }

    fn update_vote_tx_hash(&self, event_id: &str, vote_tx_hash: &str) -> DbResult<()> {
        let key = event_id.as_bytes().to_vec();
        let hash = vote_tx_hash.to_owned();
        let result: Result<(), TransactionError<DbError>> = self.events.transaction(|tree| {
            let Some(raw) = tree.get(&key)? else {
                return Ok(());
            };
            let mut entry: EventEntry = tx_decode(&raw)?;
            entry.vote_tx_hash = Some(hash.clone());
            entry.touch();
            tree.insert(key.clone(), tx_encode(&entry)?)?;
            Ok(())
        });
        result.map_err(Into::into)
    }

    fn update_event_confirmations(&self, event_id: &str, confirmations: u64) -> DbResult<()> {
        let key = event_id.as_bytes().to_vec();
        let result: Result<(), TransactionError<DbError>> = self.events.transaction(|tree| {
            let Some(raw) = tree.get(&key)? else {
                return Ok(());
            };
            let mut entry: EventEntry = tx_decode(&raw)?;
            entry.confirmations = confirmations;
            tree.insert(key.clone(), tx_encode(&entry)?)?;
            Ok(())
        });
        result.map_err(Into::into)
    }

    fn expired_events(&self, current_block: u64, limit: usize) -> DbResult<Vec<EventEntry>> {
        let mut events = self.scan_events(|e| {
            !e.status.is_terminal()
                && e.expiry_block_height > 0
                && e.expiry_block_height <= current_block
        })?;
        events.truncate(limit);
        Ok(events)
    }

    fn delete_terminal_events(&self, updated_before: i64) -> DbResult<u64> {
        let victims = self.scan_events(|e| {
            matches!(
                e.status,
                EventStatus::Completed | EventStatus::Reverted | EventStatus::Expired
            ) && e.updated_at < updated_before
        })?;

        let mut batch = sled::Batch::default();
        for event in &victims {
            batch.remove(event.event_id.as_bytes());
        }
        self.events.apply_batch(batch)?;

        let deleted = victims.len() as u64;
        if deleted > 0 {
            debug!(deleted, "purged terminal events");
        }
        Ok(deleted)
    }

    fn event_counts(&self) -> DbResult<HashMap<String, u64>> {
        let mut report: HashMap<String, u64> = HashMap::new();
        for item in self.events.iter() {
            let (_, raw) = item?;
            let entry: EventEntry = decode(&raw)?;
            *report.entry(format!("{:?}", entry.status)).or_insert(0) += 1;
        }
        Ok(report)
    }

    fn checkpoint(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn upsert_tracked_tx(&self, tx: TrackedTx) -> DbResult<bool> {
        let key = tx.tx_hash.as_bytes().to_vec();
        let result: Result<bool, TransactionError<DbError>> = self.txs.transaction(|tree| {
            match tree.get(&key)? {
                Some(raw) => {
                    let mut existing: TrackedTx = tx_decode(&raw)?;
                    existing.reset_for_replay(tx.block_number);
                    tree.insert(key.clone(), tx_encode(&existing)?)?;
                    Ok(false)
                }
                None => {
                    tree.insert(key.clone(), tx_encode(&tx)?)?;
                    Ok(true)
                }
            }
        });
        result.map_err(Into::into)
    }

    fn tracked_tx(&self, tx_hash: &str) -> DbResult<Option<TrackedTx>> {
        match self.txs.get(tx_hash.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn pending_tracked_txs(&self) -> DbResult<Vec<TrackedTx>> {
        self.scan_txs(|tx| tx.status == TrackedTxStatus::Pending)
    }

    fn confirmed_tracked_txs(&self) -> DbResult<Vec<TrackedTx>> {
        self.scan_txs(|tx| tx.status == TrackedTxStatus::Confirmed)
    }

    fn put_tracked_txs(&self, txs: Vec<TrackedTx>) -> DbResult<()> {
        let result: Result<(), TransactionError<DbError>> = self.txs.transaction(|tree| {
            for tx in &txs {
                tree.insert(tx.tx_hash.as_bytes(), tx_encode(tx)?)?;
            }
            Ok(())
        });
        result.map_err(Into::into)
    }

    fn set_tracked_tx_status(&self, tx_hash: &str, status: TrackedTxStatus) -> DbResult<bool> {
        let key = tx_hash.as_bytes().to_vec();
        let result: Result<bool, TransactionError<DbError>> = self.txs.transaction(|tree| {
            let Some(raw) = tree.get(&key)? else {
                return Ok(false);
            };
            let mut tx: TrackedTx = tx_decode(&raw)?;
            tx.status = status;
            tree.insert(key.clone(), tx_encode(&tx)?)?;
            Ok(true)
        });
        result.map_err(Into::into)
    }
}
