// Configuration management with layered configuration (defaults, file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub sftp: SftpConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    #[serde(default = "default_true")]
    pub trust_cert: bool,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub verify_host_key: bool,
    /// Folder holding one raw directory per processed request
    pub processed_dir: String,
    /// Folder holding one `.tar.zst` archive per processed request
    pub backup_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub download_concurrency: usize,
    pub restore_concurrency: usize,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Fallback credentials; the environment always wins over these
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub db_username: Option<String>,
    pub db_password: Option<String>,
    pub sftp_username: Option<String>,
    pub sftp_password: Option<String>,
    pub sftp_private_key_path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("REPLAYER")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.host.is_empty() {
            return Err("Database host cannot be empty".to_string());
        }
        if self.database.port == 0 {
            return Err("Database port must be greater than 0".to_string());
        }
        if self.database.name.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if self.sftp.host.is_empty() {
            return Err("SFTP host cannot be empty".to_string());
        }
        if self.sftp.port == 0 {
            return Err("SFTP port must be greater than 0".to_string());
        }
        if self.sftp.processed_dir.is_empty() || self.sftp.backup_dir.is_empty() {
            return Err("SFTP processed_dir and backup_dir cannot be empty".to_string());
        }

        if self.batch.download_concurrency == 0 {
            return Err("Batch download_concurrency must be greater than 0".to_string());
        }
        if self.batch.restore_concurrency == 0 {
            return Err("Batch restore_concurrency must be greater than 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Retry max_attempts must be greater than 0".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("Retry base_delay_ms cannot exceed max_delay_ms".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 1433,
                name: "AdminReporting".to_string(),
                trust_cert: true,
                connect_timeout_seconds: 30,
            },
            sftp: SftpConfig {
                host: "ftp.linkit.com".to_string(),
                port: 22,
                timeout_seconds: 60,
                verify_host_key: false,
                processed_dir: "LinkIt/ETLProcessedFolder/001".to_string(),
                backup_dir: "LinkIt/BackupData/ETLProcessedFolder/001".to_string(),
            },
            batch: BatchConfig {
                download_concurrency: 5,
                restore_concurrency: 3,
                download_dir: PathBuf::from("downloads"),
                temp_dir: std::env::temp_dir(),
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1000,
                max_delay_ms: 8000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
            },
            credentials: CredentialsConfig::default(),
        }
    }
}
