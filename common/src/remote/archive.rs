// `.tar.zst` backup archive extraction

use crate::errors::RemoteFileError;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ARCHIVE_SUFFIX: &str = ".tar.zst";

/// Raw data files kept in processed folders
pub fn is_data_file(name: &str) -> bool {
    name.ends_with(".csv") || name.ends_with(".txt")
}

pub fn is_csv(name: &str) -> bool {
    name.ends_with(".csv")
}

/// Decompress a `.tar.zst` archive and extract the regular files accepted by `filter`
///
/// Entries are flattened to their file name inside `dest`, so nested paths in
/// the archive cannot escape it. When two entries share a file name only the
/// first is kept. Returns the extracted paths in archive order.
pub fn extract_tar_zst(
    archive_path: &Path,
    dest: &Path,
    filter: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, RemoteFileError> {
    let file = File::open(archive_path)?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| {
        RemoteFileError::ArchiveFailed(format!(
            "Failed to decompress {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| RemoteFileError::ArchiveFailed(format!("Failed to read tar entries: {}", e)))?;

    let mut extracted = Vec::new();
    let mut seen = HashSet::new();
    for entry in entries {
        let mut entry = entry
            .map_err(|e| RemoteFileError::ArchiveFailed(format!("Failed to read tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = {
            let path = entry.path().map_err(|e| {
                RemoteFileError::ArchiveFailed(format!("Invalid tar entry path: {}", e))
            })?;
            match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            }
        };
        if !filter(&name) {
            continue;
        }
        if !seen.insert(name.clone()) {
            warn!(
                file = %name,
                archive = %archive_path.display(),
                "Skipping duplicate archive entry"
            );
            continue;
        }

        let target = dest.join(&name);
        entry.unpack(&target).map_err(|e| {
            RemoteFileError::ArchiveFailed(format!("Failed to extract {}: {}", name, e))
        })?;
        debug!(file = %name, "Extracted archive entry");
        extracted.push(target);
    }

    Ok(extracted)
}
