//! Lock error types
//!
//! Losing a lock to TTL expiry is not an error: `release` and `extend` report
//! it as `Ok(false)`, and an acquire that runs out of time returns `Ok(false)`.

/// Errors raised by lock operations
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// The store connection failed, timed out, or the store rejected the command
    #[error("lock store unavailable: {0}")]
    StoreUnavailable(String),

    /// `release` or `extend` was called for a name this instance does not hold
    #[error("lock '{0}' is not held by this instance")]
    NotHeld(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl LockError {
    /// Whether retrying the whole operation later could succeed
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LockError::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for LockError {
    fn from(e: redis::RedisError) -> Self {
        LockError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = LockError::NotHeld("orders".to_string());
        assert_eq!(
            format!("{}", err),
            "lock 'orders' is not held by this instance"
        );

        let err = LockError::StoreUnavailable("connection refused".to_string());
        assert_eq!(
            format!("{}", err),
            "lock store unavailable: connection refused"
        );
    }

    #[test]
    fn test_redis_error_maps_to_store_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        let err = LockError::from(redis_err);
        assert!(err.is_store_unavailable());
        assert!(!LockError::NotHeld("x".to_string()).is_store_unavailable());
    }
}
