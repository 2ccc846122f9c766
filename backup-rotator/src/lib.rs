//! Backup Rotator Library
//!
//! Grandfather-father-son retention of database dumps and folder archives,
//! kept in a local tree and mirrored to an S3-compatible bucket.

pub mod capture;
pub mod config;
pub mod local;
pub mod naming;
pub mod orchestrator;
pub mod remote;
pub mod retention;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::RotatorError;
pub type Result<T> = std::result::Result<T, RotatorError>;
