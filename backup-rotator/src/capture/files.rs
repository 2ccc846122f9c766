//! Folder archive capture: `tar | gzip [| openssl enc]`.

use super::pipeline::Stage;
use super::{destination, write_capture, Encryption};
use crate::naming::NameFormat;
use crate::retention::RunAnchor;
use crate::utils::errors::{Result, RotatorError};
use std::path::{Path, PathBuf};
use tracing::info;

/// tar's exit code for "some files differ", e.g. changed while being read.
const TAR_FILES_DIFFER: i32 = 1;

#[derive(Debug, Clone)]
pub struct FolderArchive {
    pub source: PathBuf,
    pub encryption: Option<Encryption>,
}

impl FolderArchive {
    pub fn new(source: impl Into<PathBuf>, encryption: Option<Encryption>) -> Self {
        Self {
            source: source.into(),
            encryption,
        }
    }

    /// The archive holds the source folder by its own name, relative to its
    /// parent, rather than by absolute path.
    pub fn stages(&self) -> Result<Vec<Stage>> {
        let folder_name = self.source.file_name().ok_or_else(|| {
            RotatorError::Configuration(format!(
                "cannot archive {}: path has no folder name",
                self.source.display()
            ))
        })?;
        let parent = match self.source.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let tar = Stage::new("tar")
            .args(["--warning=no-file-changed", "-cf", "-"])
            .arg(folder_name)
            .current_dir(parent)
            .accept_exit_code(TAR_FILES_DIFFER);

        let mut stages = vec![tar, Stage::new("gzip").arg("-")];
        if let Some(encryption) = &self.encryption {
            stages.push(encryption.stage());
        }
        Ok(stages)
    }

    /// Archive the source folder into `folder`, named for the run date.
    pub async fn capture(
        &self,
        anchor: RunAnchor,
        name_format: &NameFormat,
        folder: PathBuf,
    ) -> Result<PathBuf> {
        let stages = self.stages()?;
        let dest = destination(&folder, name_format, anchor);
        info!(
            source = %self.source.display(),
            file = %dest.display(),
            encrypted = self.encryption.is_some(),
            "Archiving folder"
        );
        write_capture(stages, dest).await
    }
}
