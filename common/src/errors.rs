// Error handling framework
// One enum per concern; OperationError is the umbrella used by the orchestrator

use thiserror::Error;

/// Credential resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing {kind} credentials: set {hint}")]
    Missing { kind: String, hint: String },

    #[error("Invalid {kind} credentials: {reason}")]
    Invalid { kind: String, reason: String },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Invalid query input: {0}")]
    InvalidInput(String),
}

impl DatabaseError {
    /// Connection-class failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::ConnectionFailed(_))
    }
}

/// Remote file (SFTP) errors
#[derive(Error, Debug)]
pub enum RemoteFileError {
    #[error("SFTP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SFTP authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("SFTP operation failed: {0}")]
    OperationFailed(String),

    #[error("SFTP file not found: {0}")]
    FileNotFound(String),

    #[error("Archive processing failed: {0}")]
    ArchiveFailed(String),

    #[error("Local file operation failed: {0}")]
    LocalIo(String),
}

impl RemoteFileError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteFileError::ConnectionFailed(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteFileError::FileNotFound(_))
    }
}

impl From<std::io::Error> for RemoteFileError {
    fn from(err: std::io::Error) -> Self {
        RemoteFileError::LocalIo(err.to_string())
    }
}

/// Errors surfaced by orchestrator, batch and workflow operations
#[derive(Error, Debug)]
pub enum OperationError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    RemoteFile(#[from] RemoteFileError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Local file operation failed: {0}")]
    LocalIo(String),
}

impl OperationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationError::Database(e) => e.is_retryable(),
            OperationError::RemoteFile(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for OperationError {
    fn from(err: tokio::task::JoinError) -> Self {
        OperationError::TaskFailed(err.to_string())
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        OperationError::LocalIo(err.to_string())
    }
}

impl From<tiberius::error::Error> for DatabaseError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_) => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            // 18456: login failed for user
            tiberius::error::Error::Server(token) if token.code() == 18456 => {
                DatabaseError::AuthenticationFailed(token.message().to_string())
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<ssh2::Error> for RemoteFileError {
    fn from(err: ssh2::Error) -> Self {
        match err.code() {
            // LIBSSH2_FX_NO_SUCH_FILE
            ssh2::ErrorCode::SFTP(2) => RemoteFileError::FileNotFound(err.to_string()),
            _ => RemoteFileError::OperationFailed(err.to_string()),
        }
    }
}
