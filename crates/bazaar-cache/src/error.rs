use bazaar_store::StoreError;
use bazaar_sync::LockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    #[error("cannot (de)serialize cache entry '{key}': {message}")]
    Serialization { key: String, message: String },

    #[error("gave up waiting for rebuild of '{key}' after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },
}

impl CacheError {
    #[must_use]
    pub fn serialization(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Serialization {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the caller may retry the read.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::LockTimeout { .. } => true,
            Self::Loader(_) | Self::Serialization { .. } => false,
        }
    }
}

impl From<LockError> for CacheError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Store(e) => Self::Store(e),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
