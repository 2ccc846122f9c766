//! S3-compatible object store backed by `rust-s3`.

use super::{ObjectBody, ObjectStore, Page};
use crate::config::S3Config;
use crate::utils::errors::{Result, RotatorError};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::BucketConfiguration;
use tracing::{debug, info};

/// S3 error code sent with HTTP 503 when a client is being throttled.
const SLOW_DOWN_CODE: &str = "SlowDown";

/// S3 error code for a bucket that does not exist.
const NO_SUCH_BUCKET_CODE: &str = "NoSuchBucket";

/// Client for one S3-compatible endpoint, using path-style addressing.
pub struct S3Store {
    region: Region,
    credentials: Credentials,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| RotatorError::Configuration(format!("invalid S3 credentials: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        Ok(Self { region, credentials })
    }

    fn bucket(&self, name: &str) -> Result<Bucket> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(classify)?;
        Ok(bucket.with_path_style())
    }
}

/// Map a client error onto the rotation's error taxonomy.
fn classify(err: S3Error) -> RotatorError {
    match &err {
        S3Error::HttpFailWithBody(status, body) if is_throttled(*status, body) => {
            RotatorError::RateLimited(err.to_string())
        }
        _ => RotatorError::Remote(err.to_string()),
    }
}

fn is_throttled(status: u16, body: &str) -> bool {
    status == 503 || status == 429 || body.contains(SLOW_DOWN_CODE)
}

fn is_missing_bucket(status: u16, body: &str) -> bool {
    status == 404 || body.contains(NO_SUCH_BUCKET_CODE)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        // Lists at most one key of this bucket only.
        let listing = self
            .bucket(bucket)?
            .list_page(String::new(), None, None, None, Some(1))
            .await;

        match listing {
            Ok(_) => {
                debug!(bucket, "Bucket exists");
                return Ok(());
            }
            Err(S3Error::HttpFailWithBody(status, body)) if is_missing_bucket(status, &body) => {}
            Err(e) => return Err(classify(e)),
        }

        let response = Bucket::create_with_path_style(
            bucket,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::private(),
        )
        .await
        .map_err(classify)?;

        if !response.success() {
            let status = response.response_code;
            let body = response.response_text;
            return Err(if is_throttled(status, &body) {
                RotatorError::RateLimited(body)
            } else {
                RotatorError::Remote(format!("create bucket {} failed ({}): {}", bucket, status, body))
            });
        }

        info!(bucket, "Created bucket");
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<String>,
    ) -> Result<Page<String>> {
        let (result, _status) = self
            .bucket(bucket)?
            .list_page(prefix.to_string(), None, cursor, None, None)
            .await
            .map_err(classify)?;

        let next_cursor = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };

        Ok(Page {
            items: result.contents.into_iter().map(|object| object.key).collect(),
            next_cursor,
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, mut body: ObjectBody<'_>) -> Result<()> {
        self.bucket(bucket)?
            .put_object_stream(&mut body, key)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, source_key: &str, dest_key: &str) -> Result<()> {
        self.bucket(bucket)?
            .copy_object_internal(source_key, dest_key)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let handle = self.bucket(bucket)?;
        try_join_all(keys.iter().map(|key| handle.delete_object(key)))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::retention::RetentionCounts;

    #[test]
    fn test_slow_down_is_rate_limited() {
        let err = classify(S3Error::HttpFailWithBody(
            503,
            "<Error><Code>SlowDown</Code></Error>".to_string(),
        ));
        assert!(err.is_rate_limited());

        let err = classify(S3Error::HttpFailWithBody(429, String::new()));
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_missing_bucket_detection() {
        assert!(is_missing_bucket(404, ""));
        assert!(is_missing_bucket(
            400,
            "<Error><Code>NoSuchBucket</Code></Error>"
        ));
        assert!(!is_missing_bucket(
            403,
            "<Error><Code>AccessDenied</Code></Error>"
        ));
    }

    #[test]
    fn test_bucket_handle_uses_path_style() {
        let config = S3Config {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "shh".to_string(),
            endpoint: "https://s3.example.com".to_string(),
            region: "us-east-1".to_string(),
            bucket: "backups".to_string(),
            db_prefix: "db".to_string(),
            files_prefix: "files".to_string(),
            num: RetentionCounts { daily: 7, weekly: 4, monthly: 6 },
            retry: RetrySettings::default(),
        };

        let store = S3Store::new(&config).unwrap();
        let bucket = store.bucket("backups").unwrap();

        assert_eq!(bucket.name(), "backups");
        assert!(bucket.is_path_style());
    }

    #[test]
    fn test_other_failures_are_remote_errors() {
        let err = classify(S3Error::HttpFailWithBody(
            403,
            "<Error><Code>AccessDenied</Code></Error>".to_string(),
        ));
        assert!(matches!(err, RotatorError::Remote(_)));
    }
}
