//! Unified error type for the sync engine.

use std::fmt;

use super::{ErrorCategory, NetworkError, StorageError};

/// Consolidated error type surfaced by engine operations.
///
/// The retry scheduler keys off [`SyncError::is_retryable`]: retryable
/// errors turn into queued pending operations, terminal errors roll back
/// optimistic state and are returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A transient network failure (timeout, reset, DNS, 5xx, 429).
    Network(NetworkError),

    /// The authoritative store rejected the operation. Terminal.
    Rejected { status: u16, message: String },

    /// The local cache store failed.
    Storage(StorageError),

    /// A named resource is held by another instance.
    LockContention { resource: String },

    /// The coordination service itself failed (not lock contention).
    Coordination { message: String },
}

impl SyncError {
    /// Categorize this error for handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Network(err) => {
                if matches!(err, NetworkError::HttpStatus { status, .. } if *status >= 500)
                    || matches!(err, NetworkError::RateLimited { .. })
                {
                    ErrorCategory::Server
                } else {
                    ErrorCategory::Network
                }
            }
            SyncError::Rejected { .. } => ErrorCategory::Rejected,
            SyncError::Storage(_) => ErrorCategory::Storage,
            SyncError::LockContention { .. } => ErrorCategory::Lock,
            SyncError::Coordination { .. } => ErrorCategory::Network,
        }
    }

    /// Whether the failed operation should be queued and retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(err) => err.is_retryable(),
            SyncError::Rejected { .. } => false,
            SyncError::Storage(_) => false,
            SyncError::LockContention { .. } => false,
            SyncError::Coordination { .. } => true,
        }
    }

    /// Get a user-friendly message for display in the UI error field.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Network(err) => err.user_message(),
            SyncError::Rejected { status, message } => {
                if message.is_empty() {
                    format!("The server rejected the request (HTTP {}).", status)
                } else {
                    message.clone()
                }
            }
            SyncError::Storage(err) => format!("Local cache disabled: {}", err),
            SyncError::LockContention { resource } => {
                format!("'{}' is busy in another window. Try again.", resource)
            }
            SyncError::Coordination { message } => {
                format!("Coordination service error: {}", message)
            }
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Network(err) => err.error_code(),
            SyncError::Rejected { .. } => "E_SYNC_REJECTED",
            SyncError::Storage(err) => err.error_code(),
            SyncError::LockContention { .. } => "E_SYNC_LOCKED",
            SyncError::Coordination { .. } => "E_SYNC_COORD",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Network(err) => write!(f, "{}", err),
            SyncError::Rejected { status, message } => {
                write!(f, "Rejected (HTTP {}): {}", status, message)
            }
            SyncError::Storage(err) => write!(f, "{}", err),
            SyncError::LockContention { resource } => {
                write!(f, "Lock contention on '{}'", resource)
            }
            SyncError::Coordination { message } => {
                write!(f, "Coordination error: {}", message)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Network(err) => Some(err),
            SyncError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NetworkError> for SyncError {
    fn from(err: NetworkError) -> Self {
        SyncError::Network(err)
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_retryable() {
        let err: SyncError = NetworkError::Timeout {
            operation: "createMessage".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_server_errors_categorized_as_server() {
        let err: SyncError = NetworkError::HttpStatus {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Server);
        assert!(err.is_retryable());

        let rate: SyncError = NetworkError::RateLimited {
            retry_after_secs: None,
        }
        .into();
        assert_eq!(rate.category(), ErrorCategory::Server);
    }

    #[test]
    fn test_rejected_is_terminal() {
        let err = SyncError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Rejected);
        assert_eq!(err.error_code(), "E_SYNC_REJECTED");
    }

    #[test]
    fn test_storage_is_terminal() {
        let err: SyncError = StorageError::Unavailable.into();
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_lock_contention_is_not_retryable() {
        let err = SyncError::LockContention {
            resource: "thread:t1".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("another window"));
    }

    #[test]
    fn test_rejected_user_message_falls_back_to_status() {
        let err = SyncError::Rejected {
            status: 422,
            message: String::new(),
        };
        assert!(err.user_message().contains("422"));
    }
}
