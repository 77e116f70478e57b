// Credential resolution for the database and SFTP gateways
// Lookup order: environment, then the `credentials` config section.
// Resolved values are cached for the lifetime of the manager.

use crate::config::{CredentialsConfig, SftpConfig};
use crate::errors::CredentialError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub const ENV_DB_USER: &str = "DB_UID";
pub const ENV_DB_PASSWORD: &str = "DB_PWD";
pub const ENV_SFTP_HOST: &str = "SFTP_HOST";
pub const ENV_SFTP_USER: &str = "SFTP_USER";
pub const ENV_SFTP_PASSWORD: &str = "SFTP_PWD";
pub const ENV_SFTP_KEY_PATH: &str = "SFTP_KEY_PATH";

#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// SFTP authentication method
#[derive(Clone, PartialEq, Eq)]
pub enum SftpAuth {
    Password { username: String, password: String },
    SshKey { username: String, private_key_path: String },
}

impl SftpAuth {
    pub fn username(&self) -> &str {
        match self {
            SftpAuth::Password { username, .. } | SftpAuth::SshKey { username, .. } => username,
        }
    }
}

impl fmt::Debug for SftpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpAuth::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            SftpAuth::SshKey {
                username,
                private_key_path,
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpCredentials {
    pub host: String,
    pub port: u16,
    pub auth: SftpAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Database,
    Sftp,
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves and caches gateway credentials
pub struct CredentialManager {
    config: CredentialsConfig,
    default_sftp_host: String,
    default_sftp_port: u16,
    env: EnvLookup,
    db_cache: Mutex<Option<DbCredentials>>,
    sftp_cache: Mutex<Option<SftpCredentials>>,
}

impl CredentialManager {
    pub fn new(config: CredentialsConfig, sftp: &SftpConfig) -> Self {
        Self::with_env(config, sftp, |key| std::env::var(key).ok())
    }

    /// Create a manager with a custom environment lookup
    pub fn with_env(
        config: CredentialsConfig,
        sftp: &SftpConfig,
        env: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            default_sftp_host: sftp.host.clone(),
            default_sftp_port: sftp.port,
            env: Arc::new(env),
            db_cache: Mutex::new(None),
            sftp_cache: Mutex::new(None),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|v| !v.trim().is_empty())
    }

    pub fn db_credentials(&self) -> Result<DbCredentials, CredentialError> {
        let mut cache = lock(&self.db_cache);
        if let Some(creds) = cache.as_ref() {
            return Ok(creds.clone());
        }

        let username = self
            .lookup(ENV_DB_USER)
            .or_else(|| self.config.db_username.clone());
        let password = self
            .lookup(ENV_DB_PASSWORD)
            .or_else(|| self.config.db_password.clone());

        let (Some(username), Some(password)) = (username, password) else {
            return Err(CredentialError::Missing {
                kind: "database".to_string(),
                hint: format!("{} and {}", ENV_DB_USER, ENV_DB_PASSWORD),
            });
        };

        debug!(username = %username, "Resolved database credentials");
        let creds = DbCredentials { username, password };
        *cache = Some(creds.clone());
        Ok(creds)
    }

    pub fn sftp_credentials(&self) -> Result<SftpCredentials, CredentialError> {
        let mut cache = lock(&self.sftp_cache);
        if let Some(creds) = cache.as_ref() {
            return Ok(creds.clone());
        }

        let host = self
            .lookup(ENV_SFTP_HOST)
            .unwrap_or_else(|| self.default_sftp_host.clone());
        if host.is_empty() {
            return Err(CredentialError::Invalid {
                kind: "SFTP".to_string(),
                reason: "host is empty".to_string(),
            });
        }

        let Some(username) = self
            .lookup(ENV_SFTP_USER)
            .or_else(|| self.config.sftp_username.clone())
        else {
            return Err(CredentialError::Missing {
                kind: "SFTP".to_string(),
                hint: ENV_SFTP_USER.to_string(),
            });
        };

        let key_path = self
            .lookup(ENV_SFTP_KEY_PATH)
            .or_else(|| self.config.sftp_private_key_path.clone());
        let password = self
            .lookup(ENV_SFTP_PASSWORD)
            .or_else(|| self.config.sftp_password.clone());

        let auth = match (key_path, password) {
            (Some(private_key_path), _) => SftpAuth::SshKey {
                username,
                private_key_path,
            },
            (None, Some(password)) => SftpAuth::Password { username, password },
            (None, None) => {
                return Err(CredentialError::Missing {
                    kind: "SFTP".to_string(),
                    hint: format!("{} or {}", ENV_SFTP_PASSWORD, ENV_SFTP_KEY_PATH),
                })
            }
        };

        debug!(host = %host, username = %auth.username(), "Resolved SFTP credentials");
        let creds = SftpCredentials {
            host,
            port: self.default_sftp_port,
            auth,
        };
        *cache = Some(creds.clone());
        Ok(creds)
    }

    /// Drop cached credentials so the next call resolves them again
    pub fn clear_cached(&self, kind: Option<CredentialKind>) {
        if matches!(kind, None | Some(CredentialKind::Database)) {
            *lock(&self.db_cache) = None;
        }
        if matches!(kind, None | Some(CredentialKind::Sftp)) {
            *lock(&self.sftp_cache) = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
