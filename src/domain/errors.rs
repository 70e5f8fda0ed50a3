//! Error taxonomy for the check pipeline
//!
//! Each boundary gets its own error type. `CheckError` is what the
//! orchestrator returns for a single product; none of these abort a batch.

use thiserror::Error;

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures at the HTTP fetch boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

impl FetchError {
    /// Build a fetch error from a reqwest failure
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = error.status() {
            Self::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else if error.is_body() || error.is_decode() {
            Self::Body {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// Failures of the persistence port
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Corrupt value in column '{column}': {value}")]
    CorruptValue { column: &'static str, value: String },
}

/// Failures of the notification transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Notification credentials are not configured")]
    NotConfigured,

    #[error("Notification API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Notification request failed: {0}")]
    Request(String),
}

/// Outcome errors for checking a single product
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Fetch failed: {0}")]
    Transport(#[from] FetchError),

    #[error("No extractor handles {url}")]
    NoHandler { url: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl CheckError {
    pub fn no_handler(url: impl Into<String>) -> Self {
        Self::NoHandler { url: url.into() }
    }
}
