// SFTP connection management over ssh2

use super::{RemoteConnector, RemoteEntry, RemoteFiles};
use crate::config::SftpConfig;
use crate::credentials::{CredentialManager, SftpAuth, SftpCredentials};
use crate::errors::RemoteFileError;
use crate::retry::{retry_blocking, ExponentialBackoff};
use ssh2::{Session, Sftp};
use std::fs::File;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Authenticated SFTP session
pub struct SftpSession {
    sftp: Sftp,
    _session: Session,
    _tcp: TcpStream,
}

impl SftpSession {
    /// Establish an SFTP session with password or key authentication
    #[instrument(skip(creds), fields(host = %creds.host, port = %creds.port))]
    pub fn connect(
        creds: &SftpCredentials,
        verify_host_key: bool,
        timeout_seconds: u64,
    ) -> Result<Self, RemoteFileError> {
        info!("Establishing SFTP connection");

        let tcp = TcpStream::connect((creds.host.as_str(), creds.port)).map_err(|e| {
            error!(error = %e, "Failed to connect");
            RemoteFileError::ConnectionFailed(format!(
                "Failed to connect to {}:{}: {}",
                creds.host, creds.port, e
            ))
        })?;

        let timeout = Some(Duration::from_secs(timeout_seconds));
        tcp.set_read_timeout(timeout)
            .and_then(|_| tcp.set_write_timeout(timeout))
            .map_err(|e| {
                RemoteFileError::ConnectionFailed(format!("Failed to set socket timeout: {}", e))
            })?;

        let mut session = Session::new().map_err(|e| {
            RemoteFileError::ConnectionFailed(format!("Failed to create SSH session: {}", e))
        })?;
        session.set_tcp_stream(tcp.try_clone().map_err(|e| {
            RemoteFileError::ConnectionFailed(format!("Failed to clone TCP stream: {}", e))
        })?);
        session.set_timeout((timeout_seconds * 1000).min(u32::MAX as u64) as u32);

        session.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            RemoteFileError::ConnectionFailed(format!("SSH handshake failed: {}", e))
        })?;

        if verify_host_key {
            log_host_key(&session)?;
        }

        authenticate(&session, &creds.auth)?;
        if !session.authenticated() {
            return Err(RemoteFileError::AuthenticationFailed(
                "session not authenticated".to_string(),
            ));
        }

        let sftp = session.sftp().map_err(|e| {
            RemoteFileError::ConnectionFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        info!("SFTP connection established");
        Ok(Self {
            sftp,
            _session: session,
            _tcp: tcp,
        })
    }
}

/// Record the server host key fingerprint; fails when the server offers none
fn log_host_key(session: &Session) -> Result<(), RemoteFileError> {
    let Some((_, key_type)) = session.host_key() else {
        return Err(RemoteFileError::AuthenticationFailed(
            "server presented no host key".to_string(),
        ));
    };
    if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
        let fingerprint = hash
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        info!(host_key_type = ?key_type, fingerprint = %fingerprint, "Server host key");
    }
    Ok(())
}

fn authenticate(session: &Session, auth: &SftpAuth) -> Result<(), RemoteFileError> {
    match auth {
        SftpAuth::Password { username, password } => {
            debug!(username = %username, "Authenticating with password");
            session.userauth_password(username, password).map_err(|e| {
                RemoteFileError::AuthenticationFailed(format!(
                    "Password authentication failed for user {}: {}",
                    username, e
                ))
            })
        }
        SftpAuth::SshKey {
            username,
            private_key_path,
        } => {
            debug!(username = %username, key_path = %private_key_path, "Authenticating with SSH key");
            session
                .userauth_pubkey_file(username, None, Path::new(private_key_path), None)
                .map_err(|e| {
                    RemoteFileError::AuthenticationFailed(format!(
                        "SSH key authentication failed for user {}: {}",
                        username, e
                    ))
                })
        }
    }
}

impl RemoteFiles for SftpSession {
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteFileError> {
        let entries = self.sftp.readdir(Path::new(path))?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                entry_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| RemoteEntry {
                        name: name.to_string(),
                        is_dir: stat.is_dir(),
                    })
            })
            .collect())
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteFileError> {
        let mut remote = self.sftp.open(Path::new(remote_path))?;
        let mut local = File::create(local_path)?;
        let bytes = std::io::copy(&mut remote, &mut local).map_err(|e| {
            RemoteFileError::OperationFailed(format!("Failed to read {}: {}", remote_path, e))
        })?;
        debug!(remote_path, bytes, "Downloaded file");
        Ok(bytes)
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, RemoteFileError> {
        let mut local = File::open(local_path)?;
        let mut remote = self.sftp.create(Path::new(remote_path))?;
        let bytes = std::io::copy(&mut local, &mut remote).map_err(|e| {
            RemoteFileError::OperationFailed(format!("Failed to write {}: {}", remote_path, e))
        })?;
        debug!(remote_path, bytes, "Uploaded file");
        Ok(bytes)
    }

    fn ensure_dir(&self, path: &str) -> Result<(), RemoteFileError> {
        if self.sftp.stat(Path::new(path)).is_ok() {
            return Ok(());
        }

        let absolute = path.starts_with('/');
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() || absolute {
                current.push('/');
            }
            current.push_str(part);
            let dir = Path::new(&current);
            if self.sftp.stat(dir).is_err() {
                if let Err(e) = self.sftp.mkdir(dir, 0o755) {
                    // Another session may have created it meanwhile
                    if self.sftp.stat(dir).is_err() {
                        return Err(RemoteFileError::OperationFailed(format!(
                            "Failed to create {}: {}",
                            current, e
                        )));
                    }
                }
                info!(dir = %current, "Created remote directory");
            }
        }
        Ok(())
    }
}

/// Opens a fresh SFTP session per call, with retry on connection failures
pub struct SftpConnector {
    credentials: Arc<CredentialManager>,
    verify_host_key: bool,
    timeout_seconds: u64,
    retry: ExponentialBackoff,
}

impl SftpConnector {
    pub fn new(
        credentials: Arc<CredentialManager>,
        config: &SftpConfig,
        retry: ExponentialBackoff,
    ) -> Self {
        Self {
            credentials,
            verify_host_key: config.verify_host_key,
            timeout_seconds: config.timeout_seconds,
            retry,
        }
    }
}

impl RemoteConnector for SftpConnector {
    fn connect(&self) -> Result<Box<dyn RemoteFiles>, RemoteFileError> {
        let creds = self
            .credentials
            .sftp_credentials()
            .map_err(|e| RemoteFileError::AuthenticationFailed(e.to_string()))?;

        let session = retry_blocking(
            &self.retry,
            "sftp_connect",
            RemoteFileError::is_retryable,
            || SftpSession::connect(&creds, self.verify_host_key, self.timeout_seconds),
        )?;
        Ok(Box::new(session))
    }
}
