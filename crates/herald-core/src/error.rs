//! Errors raised by storage and bus backends.

use thiserror::Error;

/// Backend errors.
///
/// Delivery failures are not errors; they surface as `false` or a zero
/// delivery count. These variants cover the shared infrastructure itself.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store or bus could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be interpreted.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for BackendError {
    fn from(e: redis::RedisError) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}
