//! Error types for gateway operations.

use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the HTTP uplink.
///
/// None of these propagate past the service boundary: a failed request is
/// logged and the operation counts as failed, with the next scheduled run
/// retrying the same semantics.
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),
}
