//! Local file discovery

use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::SyncError;

/// Candidate file found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Full path to file
    pub path: PathBuf,
    /// File name used as the remote object name
    pub base_name: String,
}

/// Find all files below `root` whose name ends with `suffix`, ignoring case
///
/// The tree is walked completely before returning,
/// entries of each directory are visited in file name order.
pub fn scan(root: &Path, suffix: &str) -> Result<Vec<LocalFile>, SyncError> {
    if !root.is_dir() {
        return Err(SyncError::DirectoryNotFound(root.to_owned()));
    }

    let suffix = suffix.to_lowercase();

    let files: Vec<LocalFile> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            entry
                .inspect_err(|e| warn!("Skipping unreadable entry below {}: {e}", root.display()))
                .ok()
        })
        .filter(|e| e.file_type().is_file() || (e.path_is_symlink() && e.path().is_file()))
        .filter_map(|e| {
            let Some(name) = e.file_name().to_str() else {
                warn!("Skipping {} with non UTF-8 name", e.path().display());
                return None;
            };
            name.to_lowercase().ends_with(&suffix).then(|| LocalFile {
                base_name: name.to_owned(),
                path: e.path().to_owned(),
            })
        })
        .collect();

    debug!(
        "Found {} files matching '{suffix}' in {}",
        files.len(),
        root.display()
    );

    Ok(files)
}
