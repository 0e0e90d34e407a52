use thiserror::Error;
use unilink_chain::ChainError;
use unilink_common::RetryableError;
use unilink_db::DbError;
use unilink_types::GatewayPayloadError;
use unilink_uchain::UniversalClientError;

/// Errors from the observation pipeline workers.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Universal(#[from] UniversalClientError),

    /// Malformed persisted payload; terminal for the affected event.
    #[error(transparent)]
    Payload(#[from] GatewayPayloadError),

    /// Required payload field absent for this event shape; terminal.
    #[error("event {event_id} failed validation: {reason}")]
    Validation { event_id: String, reason: String },
}

impl ObserverError {
    pub fn validation(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }

    /// Terminal errors mark the event failed; everything else is retried on
    /// a later tick.
    pub fn is_terminal_for_event(&self) -> bool {
        matches!(self, Self::Payload(_) | Self::Validation { .. })
    }
}

impl RetryableError for ObserverError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Chain(err) => err.is_retryable(),
            Self::Universal(err) => err.is_retryable(),
            Self::Db(_) => false,
            Self::Payload(_) | Self::Validation { .. } => false,
        }
    }
}
