use bazaar_store::StoreError;
use bazaar_sync::{IdError, LockError};
use thiserror::Error;

use crate::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum SeckillError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("invalid voucher: {message}")]
    InvalidVoucher { message: String },

    #[error("malformed admission record '{entry_id}': {message}")]
    MalformedRecord { entry_id: String, message: String },

    #[error("no stock left in the order store for voucher {voucher_id}")]
    StockDepleted { voucher_id: u64 },

    #[error("admission procedure returned unknown status {code}")]
    UnexpectedStatus { code: i64 },
}

impl SeckillError {
    #[must_use]
    pub fn invalid_voucher(message: impl Into<String>) -> Self {
        Self::InvalidVoucher {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn malformed_record(entry_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            entry_id: entry_id.into(),
            message: message.into(),
        }
    }

    /// Transient infrastructure failure the caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Id(IdError::Store(e)) => e.is_retryable(),
            Self::Repository(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<LockError> for SeckillError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Store(e) => Self::Store(e),
        }
    }
}

pub type SeckillResult<T> = Result<T, SeckillError>;
