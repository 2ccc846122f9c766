//! Custom error types for the backup rotator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RotatorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("I/O error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// The remote store asked us to slow down. Retried by `with_retry`.
    #[error("Rate limited by remote store: {0}")]
    RateLimited(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Cannot copy local backup to remote because there are no local backups")]
    NoLocalBackup,

    #[error("Name {name:?} does not match format {format:?}")]
    MalformedName { format: String, name: String },
}

impl RotatorError {
    /// True for errors the remote store signals as transient throttling.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RotatorError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, RotatorError>;
