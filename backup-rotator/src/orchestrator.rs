//! One rotation run: database backups first, then file backups.
//!
//! For each kind the local tree is brought up to date (capture, promote,
//! expire) before the remote copy is (upload, promote, expire). The first
//! failure aborts the run.

use crate::capture::{DatabaseDump, FolderArchive};
use crate::config::Config;
use crate::local::LocalEngine;
use crate::naming::NameFormat;
use crate::remote::{ObjectStore, RemoteEngine};
use crate::retention::{self, BackupRecord, Generation, RetentionCounts, RunAnchor};
use crate::utils::errors::Result;
use anyhow::Context;
use std::future::Future;
use std::path::PathBuf;
use tracing::info;

/// Per-kind settings shared by the local and remote phases.
pub struct KindPlan<'a> {
    pub kind: &'static str,
    pub name_format: &'a NameFormat,
    pub local_counts: &'a RetentionCounts,
    pub remote_counts: &'a RetentionCounts,
}

/// Rotate database and file backups against `store`.
pub async fn run<S>(config: &Config, store: &S, anchor: RunAnchor) -> anyhow::Result<()>
where
    S: ObjectStore + ?Sized,
{
    let encryption = config.encryption();
    let retry = config.s3.retry.policy();

    let db_format = config.database_name_format()?;
    let dump = DatabaseDump::from_config(&config.database, encryption.clone());
    let db_local = LocalEngine::new(&config.database.backup_dest)?;
    let db_remote = RemoteEngine::new(store, &config.s3.bucket, &config.s3.db_prefix, retry);

    run_kind(
        &KindPlan {
            kind: "database",
            name_format: &db_format,
            local_counts: &config.local.num,
            remote_counts: &config.s3.num,
        },
        anchor,
        &db_local,
        &db_remote,
        |folder| dump.capture(anchor, &db_format, folder),
    )
    .await?;

    let files_format = config.files_name_format()?;
    let archive = FolderArchive::new(&config.files.source, encryption);
    let files_local = LocalEngine::new(&config.files.backup_dest)?;
    let files_remote = RemoteEngine::new(store, &config.s3.bucket, &config.s3.files_prefix, retry);

    run_kind(
        &KindPlan {
            kind: "files",
            name_format: &files_format,
            local_counts: &config.local.num,
            remote_counts: &config.s3.num,
        },
        anchor,
        &files_local,
        &files_remote,
        |folder| archive.capture(anchor, &files_format, folder),
    )
    .await?;

    info!("Backup rotation complete");
    Ok(())
}

/// Local then remote lifecycle for one backup kind.
pub async fn run_kind<S, F, Fut>(
    plan: &KindPlan<'_>,
    anchor: RunAnchor,
    local: &LocalEngine,
    remote: &RemoteEngine<'_, S>,
    capture: F,
) -> anyhow::Result<()>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<PathBuf>>,
{
    let kind = plan.kind;
    let name_format = plan.name_format;

    // Local
    local
        .ensure_generation_folders()
        .await
        .with_context(|| format!("Failed while creating local {} backup folders.", kind))?;

    let records = local
        .scan(name_format)
        .await
        .with_context(|| format!("Failed while reading local {} backups folder.", kind))?;

    let records = if retention::is_due_today(anchor, &records) {
        info!(kind, date = %anchor.date(), "Creating local backup");
        local
            .capture(capture, name_format, records)
            .await
            .with_context(|| format!("Failed while creating {} backup.", kind))?
    } else {
        info!(kind, "Local daily backup already exists for today");
        records
    };

    let records = local
        .promote(anchor, plan.local_counts, records)
        .await
        .with_context(|| format!("Failed while promoting local {} backups.", kind))?;

    let records = local
        .expire(plan.local_counts, records)
        .await
        .with_context(|| format!("Failed while removing expired local {} backups.", kind))?;

    log_counts("local", kind, &records);

    // Remote
    remote
        .ensure_bucket()
        .await
        .with_context(|| format!("Failed while preparing bucket {}.", remote.bucket()))?;

    let mut records = remote
        .list(name_format)
        .await
        .with_context(|| format!("Failed while listing remote {} backups.", kind))?;

    if retention::is_due_today(anchor, &records) {
        let uploaded = remote
            .upload_youngest_local(local, name_format)
            .await
            .with_context(|| format!("Failed while copying local {} backup to remote.", kind))?;
        records.insert(0, uploaded);
        retention::sort_youngest_first(&mut records);
    } else {
        info!(kind, "Remote daily backup already exists for today");
    }

    let records = remote
        .promote(anchor, plan.remote_counts, records)
        .await
        .with_context(|| format!("Failed while promoting remote {} backups.", kind))?;

    let records = remote
        .expire(plan.remote_counts, records)
        .await
        .with_context(|| format!("Failed while removing expired remote {} backups.", kind))?;

    log_counts("remote", kind, &records);
    Ok(())
}

fn log_counts(tier: &str, kind: &str, records: &[BackupRecord]) {
    let [daily, weekly, monthly] = retention::count_by_generation(records);
    info!(tier, kind, daily, weekly, monthly, "Backups retained");
    if let Some(youngest) = retention::youngest(records, Generation::Daily) {
        info!(tier, kind, name = %youngest.name, "Youngest daily backup");
    }
}
