//! Configuration management for the backup rotator.
//!
//! Loads configuration from a TOML file and validates it before any backup
//! work starts.

use crate::capture::{Encryption, DEFAULT_ENCRYPTION_ITERATIONS};
use crate::naming::NameFormat;
use crate::remote::RetryPolicy;
use crate::retention::RetentionCounts;
use crate::utils::errors::{Result, RotatorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extension appended to database dump names.
pub const DATABASE_EXTENSION: &str = "sql.gz";

/// Extension appended to folder archive names.
pub const FILES_EXTENSION: &str = "tar.gz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub files: FilesConfig,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    pub local: LocalConfig,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub pass: String,
    pub name: String,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Set when the server is MariaDB rather than MySQL
    #[serde(default)]
    pub mariadb: bool,

    /// Root of the local daily/weekly/monthly folders
    pub backup_dest: PathBuf,

    /// File name template containing `[DATE]`, without extension
    pub backup_file_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Folder to archive
    pub source: PathBuf,

    pub backup_dest: PathBuf,

    pub backup_file_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Passphrase for `openssl enc`, ideally 256 bits of base64
    pub symmetric_key: String,

    #[serde(default = "default_iteration_count")]
    pub iteration_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    pub num: RetentionCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    pub bucket: String,
    pub db_prefix: String,
    pub files_prefix: String,
    pub num: RetentionCounts,

    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_iteration_count() -> u32 {
    DEFAULT_ENCRYPTION_ITERATIONS
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    6
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RotatorError::Configuration(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RotatorError::Configuration(e.to_string()))
    }

    /// Read and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("database.user", self.database.user.as_str()),
            ("database.pass", self.database.pass.as_str()),
            ("database.name", self.database.name.as_str()),
            ("database.host", self.database.host.as_str()),
            ("database.backup_file_format", self.database.backup_file_format.as_str()),
            ("files.backup_file_format", self.files.backup_file_format.as_str()),
            ("s3.access_key_id", self.s3.access_key_id.as_str()),
            ("s3.secret_access_key", self.s3.secret_access_key.as_str()),
            ("s3.endpoint", self.s3.endpoint.as_str()),
            ("s3.region", self.s3.region.as_str()),
            ("s3.bucket", self.s3.bucket.as_str()),
            ("s3.db_prefix", self.s3.db_prefix.as_str()),
            ("s3.files_prefix", self.s3.files_prefix.as_str()),
        ];
        for (key, value) in required {
            require(key, value.is_empty())?;
        }

        let paths = [
            ("database.backup_dest", &self.database.backup_dest),
            ("files.source", &self.files.source),
            ("files.backup_dest", &self.files.backup_dest),
        ];
        for (key, value) in paths {
            require(key, value.as_os_str().is_empty())?;
        }

        if let Some(encryption) = &self.encryption {
            require("encryption.symmetric_key", encryption.symmetric_key.is_empty())?;
            if encryption.iteration_count == 0 {
                return Err(RotatorError::Configuration(
                    "encryption.iteration_count must be at least 1".to_string(),
                ));
            }
        }

        if self.database.backup_file_format == self.files.backup_file_format {
            return Err(RotatorError::Configuration(
                "database.backup_file_format and files.backup_file_format cannot have the same value"
                    .to_string(),
            ));
        }

        self.database_name_format()?;
        self.files_name_format()?;

        if self.s3.retry.max_attempts == 0 {
            return Err(RotatorError::Configuration(
                "s3.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn database_name_format(&self) -> Result<NameFormat> {
        NameFormat::new(self.database.backup_file_format.as_str())
            .and_then(|nf| nf.with_extension(DATABASE_EXTENSION))
            .map_err(|e| prefix_error("database.backup_file_format", e))
    }

    pub fn files_name_format(&self) -> Result<NameFormat> {
        NameFormat::new(self.files.backup_file_format.as_str())
            .and_then(|nf| nf.with_extension(FILES_EXTENSION))
            .map_err(|e| prefix_error("files.backup_file_format", e))
    }

    pub fn encryption(&self) -> Option<Encryption> {
        self.encryption.as_ref().map(|e| Encryption {
            symmetric_key: e.symmetric_key.clone(),
            iteration_count: e.iteration_count,
        })
    }
}

fn require(key: &str, missing: bool) -> Result<()> {
    if missing {
        Err(RotatorError::Configuration(format!(
            "the config file must have a value for: {}",
            key
        )))
    } else {
        Ok(())
    }
}

fn prefix_error(key: &str, err: RotatorError) -> RotatorError {
    match err {
        RotatorError::Configuration(msg) => RotatorError::Configuration(format!("{}: {}", key, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[database]
user = "backup"
pass = "secret"
name = "app"
backup_dest = "/var/backups/db"
backup_file_format = "app-db-[DATE]"

[files]
source = "/srv/app/uploads"
backup_dest = "/var/backups/files"
backup_file_format = "app-files-[DATE]"

[local.num]
daily = 7
weekly = 4
monthly = 6

[s3]
access_key_id = "AKIA"
secret_access_key = "shh"
endpoint = "https://s3.example.com"
bucket = "backups"
db_prefix = "db"
files_prefix = "files"

[s3.num]
daily = 7
weekly = 4
monthly = 12
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 3306);
        assert!(!config.database.mariadb);
        assert_eq!(config.s3.region, "us-east-1");
        assert!(config.encryption.is_none());
        assert!(config.encryption().is_none());

        let policy = config.s3.retry.policy();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_millis(5000));

        assert_eq!(config.local.num.daily, 7);
        assert_eq!(config.s3.num.monthly, 12);
    }

    #[test]
    fn test_name_formats_carry_extensions() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.database_name_format().unwrap().as_str(), "app-db-[DATE].sql.gz");
        assert_eq!(config.files_name_format().unwrap().as_str(), "app-files-[DATE].tar.gz");
    }

    #[test]
    fn test_encryption_section() {
        let text = format!("{}\n[encryption]\nsymmetric_key = \"abc\"\n", SAMPLE);
        let config = Config::parse(&text).unwrap();
        config.validate().unwrap();

        let enc = config.encryption().unwrap();
        assert_eq!(enc.symmetric_key, "abc");
        assert_eq!(enc.iteration_count, DEFAULT_ENCRYPTION_ITERATIONS);
    }

    #[test]
    fn test_empty_required_value_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.s3.bucket = String::new();

        match config.validate() {
            Err(RotatorError::Configuration(msg)) => assert!(msg.contains("s3.bucket")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_templates_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.files.backup_file_format = config.database.backup_file_format.clone();
        assert!(matches!(config.validate(), Err(RotatorError::Configuration(_))));
    }

    #[test]
    fn test_template_without_date_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.database.backup_file_format = "app-db".to_string();

        match config.validate() {
            Err(RotatorError::Configuration(msg)) => {
                assert!(msg.contains("database.backup_file_format"))
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_template_with_two_dates_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.files.backup_file_format = "[DATE]-[DATE]".to_string();
        assert!(matches!(config.validate(), Err(RotatorError::Configuration(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.s3.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(RotatorError::Configuration(_))));
    }

    #[test]
    fn test_missing_section_is_configuration_error() {
        let result = Config::parse("[log]\nlevel = \"debug\"\n");
        assert!(matches!(result, Err(RotatorError::Configuration(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rotator.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.s3.bucket, "backups");

        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(RotatorError::Configuration(_))
        ));
    }
}
