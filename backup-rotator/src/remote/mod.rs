//! Remote (object store) side of the rotation.

pub mod engine;
pub mod paginate;
pub mod retry;
pub mod s3;

pub use engine::RemoteEngine;
pub use paginate::list_all;
pub use retry::{with_retry, RetryPolicy};
pub use s3::S3Store;

use crate::utils::errors::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// One page of a listing plus the cursor for the next page, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Object body handed to [`ObjectStore::put_object`].
pub type ObjectBody<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// The object store operations the rotation needs.
///
/// Implementations report throttling as `RotatorError::RateLimited` so that
/// callers can retry it; everything else is `RotatorError::Remote`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// List object keys under `prefix`, one page at a time.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<String>,
    ) -> Result<Page<String>>;

    async fn put_object(&self, bucket: &str, key: &str, body: ObjectBody<'_>) -> Result<()>;

    /// Server-side copy within `bucket`.
    async fn copy_object(&self, bucket: &str, source_key: &str, dest_key: &str) -> Result<()>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;
}
