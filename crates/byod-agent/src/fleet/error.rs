//! Fleet sync error types.

use thiserror::Error;

/// Result type for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors that can occur while talking to the scheduler or the tunnel helper.
#[derive(Debug, Error)]
pub enum FleetError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The remote endpoint answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The tunnel helper has no usable tunnel identifier.
    #[error("tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Local network lookup failed.
    #[error("host network error: {0}")]
    Network(#[from] std::io::Error),
}
