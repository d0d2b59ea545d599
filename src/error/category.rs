//! Error category classification for sync error handling.
//!
//! Categories drive the retry scheduler's decisions: transient categories
//! get queued and retried, terminal ones roll back optimistic state.

use std::fmt;

/// High-level categorization of sync errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level failures (connection, DNS, timeout).
    /// Transient and retryable.
    Network,

    /// Backend-side failures (HTTP 5xx, rate limiting).
    /// Transient and retryable after a delay.
    Server,

    /// The authoritative store rejected the operation (validation,
    /// permission, 4xx other than 429). Terminal.
    Rejected,

    /// The local cache store failed. The engine degrades to
    /// memory-only operation; never retried, never fatal.
    Storage,

    /// A named resource is locked by another instance. Not a failure,
    /// a "try again later" signal.
    Lock,
}

impl ErrorCategory {
    /// Whether operations failing with this category should be queued
    /// and retried rather than rolled back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }

    /// Short label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Lock => "lock",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Server.is_retryable());
        assert!(!ErrorCategory::Rejected.is_retryable());
        assert!(!ErrorCategory::Storage.is_retryable());
        assert!(!ErrorCategory::Lock.is_retryable());
    }

    #[test]
    fn test_category_as_str() {
        assert_eq!(ErrorCategory::Network.as_str(), "network");
        assert_eq!(ErrorCategory::Rejected.as_str(), "rejected");
        assert_eq!(format!("{}", ErrorCategory::Lock), "lock");
    }
}
