//! MySQL / MariaDB dump capture: `mysqldump | gzip [| openssl enc]`.

use super::pipeline::Stage;
use super::{destination, write_capture, Encryption};
use crate::config::DatabaseConfig;
use crate::naming::NameFormat;
use crate::retention::RunAnchor;
use crate::utils::errors::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DatabaseDump {
    pub user: String,
    pub pass: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// MariaDB's mysqldump has no `--set-gtid-purged`.
    pub mariadb: bool,
    pub encryption: Option<Encryption>,
}

impl DatabaseDump {
    pub fn from_config(config: &DatabaseConfig, encryption: Option<Encryption>) -> Self {
        Self {
            user: config.user.clone(),
            pass: config.pass.clone(),
            name: config.name.clone(),
            host: config.host.clone(),
            port: config.port,
            mariadb: config.mariadb,
            encryption,
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        // --no-tablespaces: creating tablespaces needs privileges backup users rarely have.
        // --set-gtid-purged=OFF: dumps fail on servers using GTID replication otherwise.
        let mut dump = Stage::new("mysqldump").arg("--no-tablespaces");
        if !self.mariadb {
            dump = dump.arg("--set-gtid-purged=OFF");
        }
        let dump = dump
            .arg("-h")
            .arg(&self.host)
            .arg("-u")
            .arg(&self.user)
            .arg("-P")
            .arg(self.port.to_string())
            .arg(&self.name)
            .env("MYSQL_PWD", &self.pass);

        let mut stages = vec![dump, Stage::new("gzip").arg("-")];
        if let Some(encryption) = &self.encryption {
            stages.push(encryption.stage());
        }
        stages
    }

    /// Dump the database into `folder`, named for the run date.
    pub async fn capture(
        &self,
        anchor: RunAnchor,
        name_format: &NameFormat,
        folder: PathBuf,
    ) -> Result<PathBuf> {
        let dest = destination(&folder, name_format, anchor);
        info!(
            database = %self.name,
            host = %self.host,
            file = %dest.display(),
            encrypted = self.encryption.is_some(),
            "Dumping database"
        );
        write_capture(self.stages(), dest).await
    }
}
