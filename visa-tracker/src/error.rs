//! Error taxonomy for the tracker pipeline and store.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network failure, timeout, or non-success HTTP status
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Content did not have any structure the parser understands
    #[error("unexpected page structure: {0}")]
    Parse(String),

    /// SMTP or message-building failure for one recipient
    #[error("notification to {email} failed: {reason}")]
    Notification { email: String, reason: String },

    /// The subscriptions file exists but cannot be read as subscriptions
    #[error("subscription store {path:?} is corrupt: {reason}")]
    StoreCorruption { path: PathBuf, reason: String },

    #[error("invalid subscription: {0}")]
    Validation(String),

    #[error("no subscription found for {0}")]
    NotFound(String),

    #[error("email is not configured: {0}")]
    EmailNotConfigured(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TrackerError::Fetch(format!("request timed out: {}", e))
        } else {
            TrackerError::Fetch(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
