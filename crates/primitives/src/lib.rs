//! Primitive identifier types shared across the unilink workspace.

mod buf;
mod chain;
mod event_id;

pub use buf::Buf32;
pub use chain::{ChainFamily, ChainRef, ParseChainRefError};
pub use event_id::{normalize_tx_hash, EventId, ParseEventIdError};
