//! Per-chain observation pipeline: event ingestion, confirmation tracking,
//! retention cleanup, vote processing and gas price reporting.

mod cleaner;
mod errors;
mod gas;
mod processor;
mod tracker;
mod watcher;

pub use cleaner::EventCleaner;
pub use errors::ObserverError;
pub use gas::GasPriceReporter;
pub use processor::{EventProcessor, ProcessorStatus};
#[cfg(any(test, feature = "test-utils"))]
pub use tracker::MockVoteHandler;
pub use tracker::{
    ConfirmationTracker, NoopVoteHandler, ThresholdPair, TrackerStatus, VoteHandler,
};
pub use watcher::{EventWatcher, WatcherStatus};
