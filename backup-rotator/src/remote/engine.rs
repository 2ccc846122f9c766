//! Remote side of the rotation, over any [`ObjectStore`].
//!
//! Keys are laid out as `<prefix>/<generation>/<name>`. Decisions come from
//! [`crate::retention`]; only the store calls are retried.

use super::paginate::list_all;
use super::retry::{with_retry, RetryPolicy};
use super::ObjectStore;
use crate::local::LocalEngine;
use crate::naming::{join_segments, NameFormat};
use crate::retention::{self, BackupRecord, Generation, RetentionCounts, RunAnchor};
use crate::transfer::progress::{format_bytes, format_speed, ProgressCallback, ProgressReader};
use crate::utils::errors::{Result, RotatorError};
use futures_util::future::{try_join, try_join3};
use std::sync::Arc;
use tokio::fs::File;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often upload progress is logged.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// One backup kind's objects in one bucket.
pub struct RemoteEngine<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    bucket: String,
    prefix: String,
    retry: RetryPolicy,
}

impl<'a, S: ObjectStore + ?Sized> RemoteEngine<'a, S> {
    pub fn new(
        store: &'a S,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            retry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix holding one generation, e.g. `db/weekly`.
    pub fn generation_prefix(&self, generation: Generation) -> String {
        join_segments(&[self.prefix.as_str(), generation.as_str()])
    }

    /// Create the bucket (private) if it is missing.
    pub async fn ensure_bucket(&self) -> Result<()> {
        let store = self.store;
        let bucket = self.bucket.as_str();
        with_retry(&self.retry, move || store.ensure_bucket(bucket)).await
    }

    /// All remote backups of every generation, youngest first.
    pub async fn list(&self, name_format: &NameFormat) -> Result<Vec<BackupRecord>> {
        let (daily, weekly, monthly) = try_join3(
            self.list_generation(name_format, Generation::Daily),
            self.list_generation(name_format, Generation::Weekly),
            self.list_generation(name_format, Generation::Monthly),
        )
        .await?;

        let mut records = daily;
        records.extend(weekly);
        records.extend(monthly);
        retention::sort_youngest_first(&mut records);

        debug!(bucket = %self.bucket, prefix = %self.prefix, count = records.len(), "Listed remote backups");
        Ok(records)
    }

    async fn list_generation(
        &self,
        name_format: &NameFormat,
        generation: Generation,
    ) -> Result<Vec<BackupRecord>> {
        let generation_prefix = self.generation_prefix(generation);
        let key_format = name_format.prefixed(&generation_prefix)?;

        let store = self.store;
        let bucket = self.bucket.as_str();
        let prefix = generation_prefix.as_str();
        let keys = list_all(&self.retry, move |cursor| store.list_page(bucket, prefix, cursor)).await?;

        let mut records = Vec::new();
        for key in keys {
            if !key_format.is_match(&key) {
                continue;
            }
            let Some(name) = key
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };

            match name_format.decode(generation, prefix, name) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, "Skipping object with unusable name: {}", e),
            }
        }

        Ok(records)
    }

    /// Upload the youngest local backup, whatever its generation, as a daily object.
    pub async fn upload_youngest_local(
        &self,
        local: &LocalEngine,
        name_format: &NameFormat,
    ) -> Result<BackupRecord> {
        let local_records = local.scan(name_format).await?;
        let youngest = local_records.first().ok_or(RotatorError::NoLocalBackup)?;

        let daily_prefix = self.generation_prefix(Generation::Daily);
        let record = BackupRecord::new(Generation::Daily, &daily_prefix, &youngest.name, youngest.date);

        let store = self.store;
        let bucket = self.bucket.as_str();
        let key = record.location.as_str();
        let path = youngest.location.as_str();

        info!(file = %path, key = %key, "Uploading backup");

        with_retry(&self.retry, move || async move {
            let file = File::open(path).await?;
            let started = Instant::now();

            let label = key.to_string();
            let callback: ProgressCallback = Arc::new(move |bytes| {
                debug!(key = %label, sent = %format_bytes(bytes), "Upload progress");
            });
            let mut reader = ProgressReader::new(file, PROGRESS_INTERVAL, callback);

            store.put_object(bucket, key, &mut reader).await?;

            let sent = reader.bytes_read();
            info!(
                key = %key,
                size = %format_bytes(sent),
                speed = %format_speed(sent, started.elapsed()),
                "Upload finished"
            );
            Ok::<(), RotatorError>(())
        })
        .await?;

        Ok(record)
    }

    /// Server-side copy of the youngest daily object into weekly and monthly when due.
    pub async fn promote(
        &self,
        anchor: RunAnchor,
        counts: &RetentionCounts,
        records: Vec<BackupRecord>,
    ) -> Result<Vec<BackupRecord>> {
        let promotions = retention::promotions(anchor, counts, &records);

        let (weekly, monthly) = try_join(
            self.promote_one(promotions.weekly, Generation::Weekly),
            self.promote_one(promotions.monthly, Generation::Monthly),
        )
        .await?;

        let mut records = records;
        records.extend(weekly.into_iter().chain(monthly));
        retention::sort_youngest_first(&mut records);
        Ok(records)
    }

    async fn promote_one(
        &self,
        source: Option<&BackupRecord>,
        generation: Generation,
    ) -> Result<Option<BackupRecord>> {
        let Some(source) = source else {
            return Ok(None);
        };

        let promoted = source.promoted(generation, &self.generation_prefix(generation));

        let store = self.store;
        let bucket = self.bucket.as_str();
        let from = source.location.as_str();
        let to = promoted.location.as_str();
        with_retry(&self.retry, move || store.copy_object(bucket, from, to)).await?;

        info!(from = %from, to = %to, "Promoted remote backup to {}", generation);
        Ok(Some(promoted))
    }

    /// Delete objects beyond each generation's quota in one batch and return the rest.
    pub async fn expire(
        &self,
        counts: &RetentionCounts,
        records: Vec<BackupRecord>,
    ) -> Result<Vec<BackupRecord>> {
        let (kept, expired) = retention::split_expired(counts, records);

        if expired.is_empty() {
            return Ok(kept);
        }

        let keys: Vec<String> = expired.iter().map(|r| r.location.clone()).collect();

        let store = self.store;
        let bucket = self.bucket.as_str();
        let batch = keys.as_slice();
        with_retry(&self.retry, move || store.delete_objects(bucket, batch)).await?;

        for key in &keys {
            info!(key = %key, "Removed expired remote backup");
        }
        Ok(kept)
    }
}
