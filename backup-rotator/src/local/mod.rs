//! Local (filesystem) side of the rotation.
//!
//! Backups live in `<root>/daily`, `<root>/weekly` and `<root>/monthly`.
//! Promotion copies a daily file into an older generation's folder and
//! expiration deletes files beyond each generation's quota.

use crate::naming::{join_segments, NameFormat};
use crate::retention::{self, BackupRecord, Generation, RetentionCounts, RunAnchor};
use crate::utils::errors::{Result, RotatorError};
use futures_util::future::{try_join, try_join3, try_join_all};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Permissions for generation folders.
#[cfg(unix)]
const FOLDER_MODE: u32 = 0o770;

/// The local backup tree of one backup kind.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    root: String,
}

impl LocalEngine {
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.to_str().ok_or_else(|| {
            RotatorError::Configuration(format!(
                "backup destination {} is not valid UTF-8",
                root.display()
            ))
        })?;

        Ok(Self {
            root: root.to_string(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Folder holding one generation.
    pub fn generation_folder(&self, generation: Generation) -> String {
        join_segments(&[self.root.as_str(), generation.as_str()])
    }

    /// Create the three generation folders. Existing folders are left alone.
    pub async fn ensure_generation_folders(&self) -> Result<()> {
        try_join3(
            self.ensure_folder(Generation::Daily),
            self.ensure_folder(Generation::Weekly),
            self.ensure_folder(Generation::Monthly),
        )
        .await?;
        Ok(())
    }

    async fn ensure_folder(&self, generation: Generation) -> Result<()> {
        let folder = self.generation_folder(generation);

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(FOLDER_MODE);

        match builder.create(&folder).await {
            Ok(()) => {
                info!(folder = %folder, "Created backup folder");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All backups of every generation, youngest first.
    pub async fn scan(&self, name_format: &NameFormat) -> Result<Vec<BackupRecord>> {
        let (daily, weekly, monthly) = try_join3(
            self.scan_generation(name_format, Generation::Daily),
            self.scan_generation(name_format, Generation::Weekly),
            self.scan_generation(name_format, Generation::Monthly),
        )
        .await?;

        let mut records = daily;
        records.extend(weekly);
        records.extend(monthly);
        retention::sort_youngest_first(&mut records);

        debug!(root = %self.root, count = records.len(), "Scanned local backups");
        Ok(records)
    }

    async fn scan_generation(
        &self,
        name_format: &NameFormat,
        generation: Generation,
    ) -> Result<Vec<BackupRecord>> {
        let folder = self.generation_folder(generation);
        let mut entries = fs::read_dir(&folder).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name_format.is_match(name) {
                continue;
            }

            match name_format.decode(generation, &folder, name) {
                Ok(record) => records.push(record),
                Err(e) => warn!(folder = %folder, "Skipping backup with unusable name: {}", e),
            }
        }

        Ok(records)
    }

    /// Produce today's daily backup with `capture` and add it to `records`.
    ///
    /// `capture` receives the daily folder and resolves to the path of the
    /// file it wrote there.
    pub async fn capture<F, Fut>(
        &self,
        capture: F,
        name_format: &NameFormat,
        mut records: Vec<BackupRecord>,
    ) -> Result<Vec<BackupRecord>>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<PathBuf>>,
    {
        let folder = self.generation_folder(Generation::Daily);
        let path = capture(PathBuf::from(&folder)).await?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RotatorError::Capture(format!("capture produced an unusable path: {}", path.display()))
            })?;

        let record = name_format.decode(Generation::Daily, &folder, name)?;
        info!(file = %record.location, "Captured new daily backup");

        records.insert(0, record);
        retention::sort_youngest_first(&mut records);
        Ok(records)
    }

    /// Copy the youngest daily backup into the weekly and monthly folders when due.
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

        let promoted = source.promoted(generation, &self.generation_folder(generation));
        fs::copy(&source.location, &promoted.location).await?;

        info!(
            from = %source.location,
            to = %promoted.location,
            "Promoted backup to {}",
            generation
        );
        Ok(Some(promoted))
    }

    /// Delete backups beyond each generation's quota and return the rest.
    pub async fn expire(
        &self,
        counts: &RetentionCounts,
        records: Vec<BackupRecord>,
    ) -> Result<Vec<BackupRecord>> {
        let (kept, expired) = retention::split_expired(counts, records);

        if expired.is_empty() {
            return Ok(kept);
        }

        try_join_all(expired.iter().map(|record| async move {
            fs::remove_file(&record.location).await?;
            info!(file = %record.location, generation = %record.generation, "Removed expired backup");
            Ok::<_, RotatorError>(())
        }))
        .await?;

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn format() -> NameFormat {
        NameFormat::new("db-[DATE].sql.gz").unwrap()
    }

    async fn engine(dir: &TempDir) -> LocalEngine {
        let engine = LocalEngine::new(dir.path()).unwrap();
        engine.ensure_generation_folders().await.unwrap();
        engine
    }

    fn write(engine: &LocalEngine, generation: Generation, name: &str) {
        let path = Path::new(&engine.generation_folder(generation)).join(name);
        std::fs::write(path, name.as_bytes()).unwrap();
    }

    fn names(records: &[BackupRecord]) -> Vec<(String, Generation)> {
        records.iter().map(|r| (r.name.clone(), r.generation)).collect()
    }

    #[tokio::test]
    async fn test_ensure_folders_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        engine.ensure_generation_folders().await.unwrap();

        for generation in Generation::ALL {
            assert!(dir.path().join(generation.as_str()).is_dir());
        }
    }

    #[tokio::test]
    async fn test_ensure_folders_reports_other_errors() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-folder");
        std::fs::write(&file, b"x").unwrap();

        let engine = LocalEngine::new(&file).unwrap();
        let result = engine.ensure_generation_folders().await;
        assert!(matches!(result, Err(RotatorError::Filesystem(_))));
    }

    #[tokio::test]
    async fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        write(&engine, Generation::Daily, "db-20190130.sql.gz");
        write(&engine, Generation::Daily, "db-20190201.sql.gz");
        write(&engine, Generation::Weekly, "db-20190131.sql.gz");
        write(&engine, Generation::Monthly, "db-20190101.sql.gz");
        write(&engine, Generation::Daily, "files-20190201.tar.gz");
        write(&engine, Generation::Daily, "db-20190201.sql.gz.partial");
        write(&engine, Generation::Daily, "db-20190231.sql.gz");

        let records = engine.scan(&format()).await.unwrap();

        assert_eq!(
            names(&records),
            vec![
                ("db-20190201.sql.gz".to_string(), Generation::Daily),
                ("db-20190131.sql.gz".to_string(), Generation::Weekly),
                ("db-20190130.sql.gz".to_string(), Generation::Daily),
                ("db-20190101.sql.gz".to_string(), Generation::Monthly),
            ]
        );
        assert_eq!(
            records[1].location,
            format!("{}/weekly/db-20190131.sql.gz", engine.root())
        );
    }

    #[tokio::test]
    async fn test_capture_prepends_daily_record() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        write(&engine, Generation::Daily, "db-20190131.sql.gz");

        let existing = engine.scan(&format()).await.unwrap();
        let records = engine
            .capture(
                |folder| async move {
                    let path = folder.join("db-20190201.sql.gz");
                    tokio::fs::write(&path, b"dump").await?;
                    Ok::<_, RotatorError>(path)
                },
                &format(),
                existing,
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, date("2019-02-01"));
        assert_eq!(records[0].generation, Generation::Daily);
    }

    #[tokio::test]
    async fn test_capture_error_propagates() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let result = engine
            .capture(
                |_| async { Err::<PathBuf, _>(RotatorError::Capture("mysqldump: access denied".into())) },
                &format(),
                Vec::new(),
            )
            .await;

        assert!(matches!(result, Err(RotatorError::Capture(_))));
    }

    #[tokio::test]
    async fn test_promote_copies_into_both_generations() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        write(&engine, Generation::Daily, "db-20190201.sql.gz");

        let records = engine.scan(&format()).await.unwrap();
        let counts = RetentionCounts { daily: 7, weekly: 4, monthly: 6 };
        let anchor = RunAnchor::new(date("2019-02-01"));

        let records = engine.promote(anchor, &counts, records).await.unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.date == date("2019-02-01")));
        for generation in [Generation::Weekly, Generation::Monthly] {
            let copy = dir.path().join(generation.as_str()).join("db-20190201.sql.gz");
            assert_eq!(std::fs::read(copy).unwrap(), b"db-20190201.sql.gz");
        }
        // source untouched
        assert!(dir.path().join("daily/db-20190201.sql.gz").exists());

        // nothing more to do on a rescan
        let rescanned = engine.scan(&format()).await.unwrap();
        let again = engine.promote(anchor, &counts, rescanned).await.unwrap();
        assert_eq!(again.len(), 3);
    }

    #[tokio::test]
    async fn test_expire_removes_oldest_beyond_quota() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        for day in 27..=31 {
            write(&engine, Generation::Daily, &format!("db-201901{day}.sql.gz"));
        }
        write(&engine, Generation::Weekly, "db-20190120.sql.gz");

        let records = engine.scan(&format()).await.unwrap();
        let counts = RetentionCounts { daily: 2, weekly: 4, monthly: 6 };
        let kept = engine.expire(&counts, records).await.unwrap();

        assert_eq!(
            names(&kept),
            vec![
                ("db-20190131.sql.gz".to_string(), Generation::Daily),
                ("db-20190130.sql.gz".to_string(), Generation::Daily),
                ("db-20190120.sql.gz".to_string(), Generation::Weekly),
            ]
        );
        let mut left: Vec<_> = std::fs::read_dir(dir.path().join("daily"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["db-20190130.sql.gz", "db-20190131.sql.gz"]);
    }

    #[tokio::test]
    async fn test_expire_nothing_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let counts = RetentionCounts { daily: 2, weekly: 4, monthly: 6 };

        let kept = engine.expire(&counts, Vec::new()).await.unwrap();
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_expire_surfaces_missing_files() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;
        let folder = engine.generation_folder(Generation::Daily);
        let records = vec![
            BackupRecord::new(Generation::Daily, &folder, "db-20190201.sql.gz", date("2019-02-01")),
            BackupRecord::new(Generation::Daily, &folder, "db-20190131.sql.gz", date("2019-01-31")),
        ];
        let counts = RetentionCounts { daily: 1, weekly: 1, monthly: 1 };

        let result = engine.expire(&counts, records).await;
        assert!(matches!(result, Err(RotatorError::Filesystem(_))));
    }
}
