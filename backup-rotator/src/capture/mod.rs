//! Capture functions: produce one new backup file for the run date.
//!
//! Each capture builds a process pipeline (dump or archive, gzip, optional
//! openssl encryption) and streams its output into the destination file.

pub mod database;
pub mod files;
pub mod pipeline;

pub use database::DatabaseDump;
pub use files::FolderArchive;
pub use pipeline::Stage;

use crate::naming::NameFormat;
use crate::retention::RunAnchor;
use crate::utils::errors::{Result, RotatorError};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{info, warn};

/// Default PBKDF2 iteration count passed to `openssl enc -iter`.
pub const DEFAULT_ENCRYPTION_ITERATIONS: u32 = 2_000_000;

/// Environment variable the encryption stage reads its passphrase from.
const ENCRYPTION_KEY_ENV: &str = "BACKUP_ROTATOR_ENCRYPTION_KEY";

/// Symmetric encryption settings for captured files.
#[derive(Debug, Clone)]
pub struct Encryption {
    pub symmetric_key: String,
    pub iteration_count: u32,
}

impl Encryption {
    pub fn new(symmetric_key: impl Into<String>) -> Self {
        Self {
            symmetric_key: symmetric_key.into(),
            iteration_count: DEFAULT_ENCRYPTION_ITERATIONS,
        }
    }

    /// `openssl enc` stage. The key travels through the environment so it
    /// never shows up in the process list.
    pub(crate) fn stage(&self) -> Stage {
        Stage::new("openssl")
            .args(["enc", "-aes-256-cbc", "-pbkdf2", "-iter"])
            .arg(self.iteration_count.to_string())
            .arg("-salt")
            .arg("-pass")
            .arg(format!("env:{}", ENCRYPTION_KEY_ENV))
            .env(ENCRYPTION_KEY_ENV, &self.symmetric_key)
    }
}

/// Path of the file a capture writes for `anchor` inside `folder`.
pub fn destination(folder: &Path, name_format: &NameFormat, anchor: RunAnchor) -> PathBuf {
    folder.join(name_format.to_concrete_name(anchor.date()))
}

/// Run `stages` into a fresh file at `dest`.
///
/// On failure the partial file is removed (one retry) and the pipeline's
/// error is returned regardless of whether the removal worked.
pub async fn write_capture(stages: Vec<Stage>, dest: PathBuf) -> Result<PathBuf> {
    let mut file = File::create(&dest).await?;

    let result = match pipeline::run(stages, &mut file).await {
        Ok(()) => file.sync_all().await.map_err(RotatorError::from),
        Err(e) => Err(e),
    };
    drop(file);

    match result {
        Ok(()) => {
            info!(file = %dest.display(), "Capture finished");
            Ok(dest)
        }
        Err(e) => {
            remove_partial(&dest).await;
            Err(e)
        }
    }
}

/// Returns whether the file was removed.
async fn remove_partial(path: &Path) -> bool {
    for attempt in 1..=2 {
        match fs::remove_file(path).await {
            Ok(()) => return true,
            Err(e) => warn!(
                file = %path.display(),
                attempt,
                error = %e,
                "Failed to remove partial capture"
            ),
        }
    }
    false
}
