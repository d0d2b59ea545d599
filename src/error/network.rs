//! Network-related error types.
//!
//! Errors raised while talking to the authoritative store or the
//! coordination service, classified for the retry scheduler.

use std::fmt;

/// Network-specific error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Connection to the server failed (refused, reset by peer).
    ConnectionFailed { url: String, message: String },

    /// DNS resolution failed.
    DnsResolutionFailed { host: String },

    /// Request timed out.
    Timeout { operation: String },

    /// HTTP status error (non-2xx response).
    HttpStatus { status: u16, message: String },

    /// Rate limited by the server (HTTP 429).
    RateLimited { retry_after_secs: Option<u64> },

    /// Response body could not be decoded.
    InvalidResponse { message: String },

    /// Generic network error.
    Other { message: String },
}

impl NetworkError {
    /// Check if this error is likely transient and can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::ConnectionFailed { .. } => true,
            NetworkError::DnsResolutionFailed { .. } => true,
            NetworkError::Timeout { .. } => true,
            NetworkError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            NetworkError::RateLimited { .. } => true,
            NetworkError::InvalidResponse { .. } => false,
            NetworkError::Other { .. } => false,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            NetworkError::ConnectionFailed { .. } => {
                "Unable to reach the server. Changes will sync when you're back online."
                    .to_string()
            }
            NetworkError::DnsResolutionFailed { host } => {
                format!("Could not resolve server address '{}'.", host)
            }
            NetworkError::Timeout { operation } => {
                format!("The {} operation timed out.", operation)
            }
            NetworkError::HttpStatus { status, .. } => match *status {
                401 => "Authentication required. Please sign in again.".to_string(),
                403 => "Access denied. You don't have permission for this action.".to_string(),
                404 => "The requested conversation no longer exists.".to_string(),
                500..=599 => {
                    "The server is experiencing issues. Your changes will be retried.".to_string()
                }
                _ => format!("The server returned an error (HTTP {}).", status),
            },
            NetworkError::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => format!("Too many requests. Retrying in {} seconds.", secs),
                None => "Too many requests. Retrying shortly.".to_string(),
            },
            NetworkError::InvalidResponse { .. } => {
                "Received an invalid response from the server.".to_string()
            }
            NetworkError::Other { message } => format!("Network error: {}", message),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed { .. } => "E_NET_CONN",
            NetworkError::DnsResolutionFailed { .. } => "E_NET_DNS",
            NetworkError::Timeout { .. } => "E_NET_TIMEOUT",
            NetworkError::HttpStatus { .. } => "E_NET_HTTP",
            NetworkError::RateLimited { .. } => "E_NET_RATE",
            NetworkError::InvalidResponse { .. } => "E_NET_INVALID",
            NetworkError::Other { .. } => "E_NET_OTHER",
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionFailed { url, message } => {
                write!(f, "Connection failed to '{}': {}", url, message)
            }
            NetworkError::DnsResolutionFailed { host } => {
                write!(f, "DNS resolution failed for '{}'", host)
            }
            NetworkError::Timeout { operation } => write!(f, "{} timed out", operation),
            NetworkError::HttpStatus { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            NetworkError::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "Rate limited, retry after {} seconds", secs),
                None => write!(f, "Rate limited"),
            },
            NetworkError::InvalidResponse { message } => {
                write!(f, "Invalid response: {}", message)
            }
            NetworkError::Other { message } => write!(f, "Network error: {}", message),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Classify a reqwest error into a NetworkError.
pub fn classify_reqwest_error(err: &reqwest::Error, url: &str) -> NetworkError {
    if err.is_connect() {
        NetworkError::ConnectionFailed {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else if err.is_timeout() {
        NetworkError::Timeout {
            operation: "HTTP request".to_string(),
        }
    } else if err.is_status() {
        match err.status() {
            Some(status) if status.as_u16() == 429 => NetworkError::RateLimited {
                retry_after_secs: None,
            },
            Some(status) => NetworkError::HttpStatus {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => NetworkError::HttpStatus {
                status: 0,
                message: err.to_string(),
            },
        }
    } else if err.is_decode() {
        NetworkError::InvalidResponse {
            message: format!("Failed to decode response: {}", err),
        }
    } else {
        let err_str = err.to_string().to_lowercase();
        if err_str.contains("dns") || err_str.contains("resolve") {
            NetworkError::DnsResolutionFailed {
                host: extract_host_from_url(url),
            }
        } else {
            NetworkError::Other {
                message: err.to_string(),
            }
        }
    }
}

/// Extract the host portion from a URL string.
fn extract_host_from_url(url: &str) -> String {
    let url_lower = url.to_lowercase();
    let without_scheme = if url_lower.starts_with("https://") {
        &url[8..]
    } else if url_lower.starts_with("http://") {
        &url[7..]
    } else {
        url
    };

    without_scheme
        .split(&['/', ':'][..])
        .next()
        .unwrap_or(url)
        .to_string()
}
