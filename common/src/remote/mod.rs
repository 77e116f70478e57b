// Remote file gateway
// Blocking SFTP-style operations behind a trait so transfers can run against
// the ssh2 implementation or the in-memory tree

pub mod archive;
pub mod memory;
pub mod paths;
pub mod sftp;
pub mod transfer;

pub use memory::MemoryRemote;
pub use paths::to_remote_path;
pub use sftp::SftpConnector;

use crate::errors::RemoteFileError;
use std::path::Path;

/// A single directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// An open session against the remote file server
///
/// Calls block; run them on a blocking worker thread.
pub trait RemoteFiles: Send {
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteFileError>;

    /// Copy a remote file to a local path; returns bytes written
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteFileError>;

    /// Copy a local file to a remote path; returns bytes written
    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, RemoteFileError>;

    /// Create the directory and any missing parents
    fn ensure_dir(&self, path: &str) -> Result<(), RemoteFileError>;
}

/// Opens new remote sessions; each batch item gets its own
pub trait RemoteConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteFiles>, RemoteFileError>;
}

/// Join a remote directory and a child name with exactly one slash
pub fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
