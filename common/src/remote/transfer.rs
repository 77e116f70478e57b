// Request-level transfer operations
// Locate a request's raw folder or backup archive and move its files,
// either down to a local directory or back into the district's upload folder

use super::archive::{self, ARCHIVE_SUFFIX};
use super::{join_remote, RemoteFiles};
use crate::config::SftpConfig;
use crate::errors::RemoteFileError;
use crate::models::ItemOutcome;
use std::path::Path;
use tracing::{debug, info, warn};

/// Where processed requests live on the remote server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// One raw directory per request
    pub processed_dir: String,
    /// One `.tar.zst` per request
    pub backup_dir: String,
}

impl From<&SftpConfig> for RemoteLayout {
    fn from(config: &SftpConfig) -> Self {
        Self {
            processed_dir: config.processed_dir.clone(),
            backup_dir: config.backup_dir.clone(),
        }
    }
}

/// A name belongs to a request when it is the id itself or the id followed by a non-digit
pub fn matches_request(name: &str, request_id: i32) -> bool {
    match name.strip_prefix(&request_id.to_string()) {
        Some(rest) => rest.chars().next().map_or(true, |c| !c.is_ascii_digit()),
        None => false,
    }
}

/// Full path of the request's raw folder inside `dir`
pub fn find_request_folder(
    remote: &dyn RemoteFiles,
    dir: &str,
    request_id: i32,
) -> Result<Option<String>, RemoteFileError> {
    let mut entries = remote.list_dir(dir)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries
        .into_iter()
        .find(|e| e.is_dir && matches_request(&e.name, request_id))
        .map(|e| join_remote(dir, &e.name)))
}

/// Full path of the request's backup archive inside `dir`
pub fn find_request_archive(
    remote: &dyn RemoteFiles,
    dir: &str,
    request_id: i32,
) -> Result<Option<String>, RemoteFileError> {
    let mut entries = remote.list_dir(dir)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries
        .into_iter()
        .find(|e| !e.is_dir && e.name.ends_with(ARCHIVE_SUFFIX) && matches_request(&e.name, request_id))
        .map(|e| join_remote(dir, &e.name)))
}

fn file_name(remote_path: &str) -> &str {
    remote_path.rsplit('/').next().unwrap_or(remote_path)
}

fn finish(count: usize, errors: Vec<String>, success_message: String) -> ItemOutcome {
    if errors.is_empty() {
        ItemOutcome::succeeded(count, success_message)
    } else {
        ItemOutcome::with_errors(count, &errors)
    }
}

fn work_dir(temp_root: &Path, request_id: i32) -> Result<tempfile::TempDir, ItemOutcome> {
    std::fs::create_dir_all(temp_root)
        .and_then(|_| {
            tempfile::Builder::new()
                .prefix(&format!("req_{}_", request_id))
                .tempdir_in(temp_root)
        })
        .map_err(|e| {
            ItemOutcome::failed(format!(
                "Failed to prepare working dir in '{}': {}",
                temp_root.display(),
                e
            ))
        })
}

/// Data files of a raw request folder, sorted by name
fn data_files(remote: &dyn RemoteFiles, folder: &str) -> Result<Vec<String>, ItemOutcome> {
    let entries = remote
        .list_dir(folder)
        .map_err(|e| ItemOutcome::failed(format!("Error listing {}: {}", folder, e)))?;
    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_dir && archive::is_data_file(&e.name))
        .map(|e| e.name)
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(ItemOutcome::failed(format!(
            "No CSV or TXT files found in {}",
            folder
        )));
    }
    Ok(files)
}

// ============================================================================
// Download
// ============================================================================

/// Copy `.csv`/`.txt` files from the request's processed folder into `local_dir`
pub fn download_raw_files(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    local_dir: &Path,
) -> ItemOutcome {
    let dir = &layout.processed_dir;
    let folder = match find_request_folder(remote, dir, request_id) {
        Ok(Some(folder)) => folder,
        Ok(None) => {
            return ItemOutcome::failed(format!(
                "No directory found for request {} in {}",
                request_id, dir
            ))
        }
        Err(e) => return ItemOutcome::failed(format!("Error listing {}: {}", dir, e)),
    };
    debug!(request_id, folder = %folder, "Found raw request folder");

    let files = match data_files(remote, &folder) {
        Ok(files) => files,
        Err(outcome) => return outcome,
    };

    let mut count = 0;
    let mut errors = Vec::new();
    for name in files {
        match remote.download(&join_remote(&folder, &name), &local_dir.join(&name)) {
            Ok(_) => count += 1,
            Err(e) => errors.push(format!("Failed to download {}: {}", name, e)),
        }
    }
    finish(count, errors, format!("Successfully downloaded {} data files", count))
}

/// Fetch the request's backup archive and extract its `.csv` files into `local_dir`
pub fn download_backup_archive(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    local_dir: &Path,
    temp_root: &Path,
) -> ItemOutcome {
    let dir = &layout.backup_dir;
    let archive_path = match find_request_archive(remote, dir, request_id) {
        Ok(Some(path)) => path,
        Ok(None) => {
            return ItemOutcome::failed(format!(
                "No .tar.zst file found for {} in {}",
                request_id, dir
            ))
        }
        Err(e) => return ItemOutcome::failed(format!("Error listing {}: {}", dir, e)),
    };

    let work = match work_dir(temp_root, request_id) {
        Ok(work) => work,
        Err(outcome) => return outcome,
    };
    let extracted = match fetch_and_extract(remote, &archive_path, work.path(), archive::is_csv) {
        Ok(files) => files,
        Err(outcome) => return outcome,
    };
    if extracted.is_empty() {
        return ItemOutcome::failed(format!("No .csv files found in {}", archive_path));
    }

    let mut count = 0;
    let mut errors = Vec::new();
    for path in extracted {
        let Some(name) = path.file_name() else {
            continue;
        };
        // Copy rather than rename: the temp root may sit on another filesystem
        match std::fs::copy(&path, local_dir.join(name)) {
            Ok(_) => count += 1,
            Err(e) => errors.push(format!("Failed to move {}: {}", name.to_string_lossy(), e)),
        }
    }
    finish(count, errors, format!("Successfully processed {} CSV files", count))
}

/// Download an archive into `work` and extract the entries accepted by `filter`
fn fetch_and_extract(
    remote: &dyn RemoteFiles,
    archive_path: &str,
    work: &Path,
    filter: impl Fn(&str) -> bool,
) -> Result<Vec<std::path::PathBuf>, ItemOutcome> {
    let local_archive = work.join(file_name(archive_path));
    remote
        .download(archive_path, &local_archive)
        .map_err(|e| ItemOutcome::failed(format!("Failed to download {}: {}", archive_path, e)))?;

    let extract_dir = work.join("extract");
    std::fs::create_dir_all(&extract_dir)
        .map_err(|e| ItemOutcome::failed(format!("Failed to prepare extract dir: {}", e)))?;
    archive::extract_tar_zst(&local_archive, &extract_dir, filter)
        .map_err(|e| ItemOutcome::failed(e.to_string()))
}

/// Download a request's files into `<base_dir>/RequestID_<id>`
///
/// Raw processed files are tried first; on any failure the backup archive is used.
pub fn download_request_files(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    base_dir: &Path,
    temp_root: &Path,
) -> ItemOutcome {
    let request_dir = base_dir.join(format!("RequestID_{}", request_id));
    if let Err(e) = std::fs::create_dir_all(&request_dir) {
        return ItemOutcome::failed(format!("Failed to create request directory: {}", e));
    }

    let raw = download_raw_files(remote, layout, request_id, &request_dir);
    let outcome = if raw.success {
        raw
    } else {
        debug!(request_id, reason = %raw.message, "Raw download failed, trying backup archive");
        download_backup_archive(remote, layout, request_id, &request_dir, temp_root)
    };

    info!(
        request_id,
        success = outcome.success,
        files = outcome.files,
        "Download finished"
    );
    outcome.at(request_dir)
}

// ============================================================================
// Restore
// ============================================================================

/// Upload every regular file of the request's archive into `target_dir`
///
/// Returns None when neither folder holds an archive for the request.
pub fn restore_from_archive(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    target_dir: &str,
    temp_root: &Path,
) -> Option<ItemOutcome> {
    let archive_path = [&layout.backup_dir, &layout.processed_dir]
        .into_iter()
        .find_map(|dir| match find_request_archive(remote, dir, request_id) {
            Ok(found) => found,
            Err(e) => {
                warn!(request_id, dir = %dir, error = %e, "Failed to list archive folder");
                None
            }
        })?;
    debug!(request_id, archive = %archive_path, "Found backup archive");

    let work = match work_dir(temp_root, request_id) {
        Ok(work) => work,
        Err(outcome) => return Some(outcome),
    };
    let extracted = match fetch_and_extract(remote, &archive_path, work.path(), |_| true) {
        Ok(files) => files,
        Err(outcome) => return Some(outcome),
    };
    if extracted.is_empty() {
        return Some(ItemOutcome::failed(format!(
            "No files found in {}",
            archive_path
        )));
    }

    if let Err(e) = remote.ensure_dir(target_dir) {
        return Some(ItemOutcome::failed(format!(
            "Failed to create target directory {}: {}",
            target_dir, e
        )));
    }

    let mut count = 0;
    let mut errors = Vec::new();
    for path in extracted {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match remote.upload(&path, &join_remote(target_dir, name)) {
            Ok(_) => count += 1,
            Err(e) => errors.push(format!("Failed to upload {}: {}", name, e)),
        }
    }
    Some(finish(
        count,
        errors,
        format!("Successfully processed {} files", count),
    ))
}

/// Copy the request's raw data files into `target_dir` through a local working dir
pub fn restore_raw_files(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    target_dir: &str,
    temp_root: &Path,
) -> ItemOutcome {
    let folder = [&layout.processed_dir, &layout.backup_dir]
        .into_iter()
        .find_map(|dir| match find_request_folder(remote, dir, request_id) {
            Ok(found) => found,
            Err(e) => {
                warn!(request_id, dir = %dir, error = %e, "Failed to list raw folder");
                None
            }
        });
    let Some(folder) = folder else {
        return ItemOutcome::failed(format!(
            "No directory found for request {} in {} or {}",
            request_id, layout.processed_dir, layout.backup_dir
        ));
    };

    let files = match data_files(remote, &folder) {
        Ok(files) => files,
        Err(outcome) => return outcome,
    };
    if let Err(e) = remote.ensure_dir(target_dir) {
        return ItemOutcome::failed(format!(
            "Failed to create target directory {}: {}",
            target_dir, e
        ));
    }
    let work = match work_dir(temp_root, request_id) {
        Ok(work) => work,
        Err(outcome) => return outcome,
    };

    let mut count = 0;
    let mut errors = Vec::new();
    for name in files {
        let local = work.path().join(&name);
        let moved = remote
            .download(&join_remote(&folder, &name), &local)
            .and_then(|_| remote.upload(&local, &join_remote(target_dir, &name)));
        match moved {
            Ok(_) => count += 1,
            Err(e) => errors.push(format!("Failed to move {}: {}", name, e)),
        }
    }
    finish(count, errors, format!("Successfully moved {} data files", count))
}

/// Put a request's files back into its remote upload directory
///
/// The archive is preferred; raw files are used only when no archive exists.
pub fn restore_request_files(
    remote: &dyn RemoteFiles,
    layout: &RemoteLayout,
    request_id: i32,
    target_dir: &str,
    temp_root: &Path,
) -> ItemOutcome {
    let outcome = match restore_from_archive(remote, layout, request_id, target_dir, temp_root) {
        Some(outcome) => outcome,
        None => {
            debug!(request_id, "No archive found, restoring raw files");
            restore_raw_files(remote, layout, request_id, target_dir, temp_root)
        }
    };

    info!(
        request_id,
        target_dir,
        success = outcome.success,
        files = outcome.files,
        "Restore finished"
    );
    outcome
}
