//! Transfer helpers.

pub mod progress;

pub use progress::{format_bytes, format_speed, ProgressCallback, ProgressReader};
