//! Store error types.

/// Errors that can occur while talking to the key/value store.
///
/// `Unavailable` is a transient infrastructure failure. It must be surfaced to
/// callers as retryable and never be read as "key absent" or "lock not
/// acquired".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, I/O, timeout).
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the infrastructure failure.
        message: String,
    },

    /// The store rejected a command (wrong type, bad argument).
    #[error("Store command failed: {message}")]
    Command {
        /// Description of the command failure.
        message: String,
    },

    /// An atomic procedure failed while executing.
    #[error("Procedure '{procedure}' failed: {message}")]
    Script {
        /// Name of the procedure.
        procedure: String,
        /// Description of the failure.
        message: String,
    },

    /// The store replied with something the caller did not expect.
    #[error("Unexpected store reply: {message}")]
    Protocol {
        /// Description of the unexpected reply.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a new `Script` error.
    #[must_use]
    pub fn script(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            procedure: procedure.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            Self::unavailable(err.to_string())
        } else {
            Self::command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::unavailable(format!("failed to get Redis connection: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
