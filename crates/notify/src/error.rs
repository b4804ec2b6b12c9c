//! Error types for the notification system.

use thiserror::Error;

/// Errors that can occur when sending notifications.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed (connect error, timeout, ...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The service answered with a non-success status
    #[error("{channel} returned {status}: {body}")]
    Rejected {
        /// Channel name
        channel: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },
}
