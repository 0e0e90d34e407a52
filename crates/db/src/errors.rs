use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Storage layer errors.
///
/// Compare-and-swap misses are NOT errors; those surface as a zero
/// rows-affected result.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sled: {0}")]
    Backend(#[from] sled::Error),

    #[error("codec: {0}")]
    Codec(String),

    #[error("transaction: {0}")]
    Transaction(String),
}

impl DbError {
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<DbError>> for DbError {
    fn from(value: sled::transaction::TransactionError<DbError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => Self::Backend(err),
        }
    }
}
