// In-memory remote file tree
// Behaves like an SFTP server for transfers in tests and local dry runs

use super::{RemoteConnector, RemoteEntry, RemoteFiles};
use crate::errors::RemoteFileError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    failing: BTreeSet<String>,
    refuse_connections: bool,
    connections: usize,
}

/// Shared in-memory tree; clones see the same contents
#[derive(Clone, Default)]
pub struct MemoryRemote {
    tree: Arc<Mutex<Tree>>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> Option<String> {
    path.rfind('/').map(|idx| {
        if idx == 0 {
            "/".to_string()
        } else {
            path[..idx].to_string()
        }
    })
}

/// Every ancestor of `path`, including itself, shortest first
fn ancestors(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() || absolute {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.lock();
        for dir in ancestors(&normalize(path)) {
            tree.dirs.insert(dir);
        }
    }

    /// Add a file, creating its parent directories
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        if let Some(parent) = parent_of(&path) {
            self.add_dir(&parent);
        }
        self.lock().files.insert(path, contents.into());
    }

    /// Make every transfer touching `path` fail
    pub fn fail_on(&self, path: &str) {
        self.lock().failing.insert(normalize(path));
    }

    pub fn refuse_connections(&self) {
        self.lock().refuse_connections = true;
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        let tree = self.lock();
        tree.files.contains_key(&path) || tree.dirs.contains(&path)
    }

    /// File names directly inside `dir`, sorted
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", normalize(dir).trim_end_matches('/'));
        self.lock()
            .files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    /// Sessions opened through the connector so far
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    fn check_failing(&self, path: &str) -> Result<(), RemoteFileError> {
        if self.lock().failing.contains(path) {
            return Err(RemoteFileError::OperationFailed(format!(
                "injected failure for {}",
                path
            )));
        }
        Ok(())
    }
}

impl RemoteFiles for MemoryRemote {
    fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteFileError> {
        let path = normalize(path);
        let tree = self.lock();
        if !tree.dirs.contains(&path) {
            return Err(RemoteFileError::FileNotFound(path));
        }

        let prefix = format!("{}/", path.trim_end_matches('/'));
        let child = |key: &String| {
            key.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };
        let mut entries: Vec<RemoteEntry> = tree
            .dirs
            .iter()
            .filter_map(child)
            .map(|name| RemoteEntry { name, is_dir: true })
            .chain(
                tree.files
                    .keys()
                    .filter_map(child)
                    .map(|name| RemoteEntry { name, is_dir: false }),
            )
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteFileError> {
        let remote_path = normalize(remote_path);
        self.check_failing(&remote_path)?;
        let data = self
            .lock()
            .files
            .get(&remote_path)
            .cloned()
            .ok_or_else(|| RemoteFileError::FileNotFound(remote_path.clone()))?;
        std::fs::write(local_path, &data)?;
        Ok(data.len() as u64)
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, RemoteFileError> {
        let remote_path = normalize(remote_path);
        self.check_failing(&remote_path)?;
        let data = std::fs::read(local_path)?;
        let mut tree = self.lock();
        if let Some(parent) = parent_of(&remote_path) {
            if !tree.dirs.contains(&parent) {
                return Err(RemoteFileError::FileNotFound(parent));
            }
        }
        let len = data.len() as u64;
        tree.files.insert(remote_path, data);
        Ok(len)
    }

    fn ensure_dir(&self, path: &str) -> Result<(), RemoteFileError> {
        let path = normalize(path);
        self.check_failing(&path)?;
        self.add_dir(&path);
        Ok(())
    }
}

impl RemoteConnector for MemoryRemote {
    fn connect(&self) -> Result<Box<dyn RemoteFiles>, RemoteFileError> {
        let mut tree = self.lock();
        if tree.refuse_connections {
            return Err(RemoteFileError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }
        tree.connections += 1;
        drop(tree);
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shows_direct_children_only() {
        let remote = MemoryRemote::new();
        remote.add_file("LinkIt/001/123_a/data.csv", "x");
        remote.add_file("LinkIt/001/124.tar.zst", "y");

        let entries = remote.list_dir("LinkIt/001").unwrap();
        assert_eq!(
            entries,
            vec![
                RemoteEntry {
                    name: "123_a".into(),
                    is_dir: true
                },
                RemoteEntry {
                    name: "124.tar.zst".into(),
                    is_dir: false
                },
            ]
        );
        assert!(remote.list_dir("LinkIt/missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_upload_requires_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.csv");
        std::fs::write(&local, "1,2").unwrap();

        let remote = MemoryRemote::new();
        assert!(remote.upload(&local, "/Districts/7/a.csv").is_err());

        remote.ensure_dir("/Districts/7").unwrap();
        assert_eq!(remote.upload(&local, "/Districts/7/a.csv").unwrap(), 3);
        assert_eq!(remote.files_in("/Districts/7"), vec!["a.csv".to_string()]);
        assert!(remote.exists("/Districts"));
    }

    #[test]
    fn test_connector_counts_sessions() {
        let remote = MemoryRemote::new();
        remote.connect().unwrap();
        remote.connect().unwrap();
        assert_eq!(remote.connections(), 2);

        remote.refuse_connections();
        assert!(matches!(remote.connect(), Err(e) if e.is_retryable()));
    }
}
