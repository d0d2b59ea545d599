//! Local cache store error types.
//!
//! Cache failures never abort the engine: the caller wraps every cache
//! call and degrades to memory-only operation on the first failure.

use thiserror::Error;

/// Errors raised by a [`LocalCacheStore`](crate::traits::LocalCacheStore)
/// implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// Underlying I/O failed (disk full, permissions, missing directory).
    #[error("Cache I/O error: {message}")]
    Io { message: String },

    /// A stored document could not be serialized or deserialized.
    #[error("Cache serialization error: {message}")]
    Serialization { message: String },

    /// The store is not usable at all (no data directory, closed handle).
    #[error("Cache store unavailable")]
    Unavailable,
}

impl StorageError {
    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Io { .. } => "E_STORE_IO",
            StorageError::Serialization { .. } => "E_STORE_SERDE",
            StorageError::Unavailable => "E_STORE_UNAVAILABLE",
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: StorageError = io_err.into();
        assert_eq!(err.error_code(), "E_STORE_IO");
        assert!(format!("{}", err).contains("not found"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: StorageError = json_err.into();
        assert_eq!(err.error_code(), "E_STORE_SERDE");
    }

    #[test]
    fn test_unavailable_display() {
        assert_eq!(
            format!("{}", StorageError::Unavailable),
            "Cache store unavailable"
        );
    }
}
