//! Source directory selection and persistence

use std::{
    fs,
    io::{self, BufRead as _, IsTerminal as _, Write as _},
    path::{Path, PathBuf},
};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Something able to name a source directory when none was persisted yet
pub trait DirectorySource {
    /// Return the selected directory or `None` when nothing was selected
    fn resolve(&mut self) -> Option<PathBuf>;
}

/// Directory from the configuration, asking on the terminal otherwise
#[derive(Debug, Default)]
pub struct DirectoryPrompt {
    preset: Option<PathBuf>,
}

impl DirectoryPrompt {
    pub fn new(preset: Option<PathBuf>) -> Self {
        Self { preset }
    }
}

impl DirectorySource for DirectoryPrompt {
    fn resolve(&mut self) -> Option<PathBuf> {
        if let Some(preset) = &self.preset {
            return Some(preset.clone());
        }

        let stdin = io::stdin();
        if !stdin.is_terminal() {
            warn!("No source directory configured and no terminal to ask for one");
            return None;
        }

        print!("Directory to synchronize: ");
        io::stdout().flush().ok()?;

        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .inspect_err(|e| warn!("Failed to read directory from terminal: {e}"))
            .ok()?;

        let line = line.trim();
        (!line.is_empty()).then(|| PathBuf::from(line))
    }
}

/// Persisted record of the selected source directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub dicom_directory: PathBuf,
}

impl DirectoryRecord {
    /// Read the record at `path`, a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>, SyncError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(state_error(path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| state_error(path, e))
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string(self).map_err(|e| state_error(path, e))?;
        fs::write(path, json).map_err(|e| state_error(path, e))
    }
}

fn state_error(path: &Path, e: impl std::fmt::Display) -> SyncError {
    SyncError::State {
        path: path.to_owned(),
        message: e.to_string(),
    }
}

/// Determine the source directory for a cycle
///
/// A persisted record wins. Otherwise the directory comes from `source`
/// and is persisted to `state_file` if it exists.
pub fn resolve_source_directory<D: DirectorySource + ?Sized>(
    state_file: &Path,
    source: &mut D,
) -> Result<PathBuf, SyncError> {
    if let Some(record) = DirectoryRecord::load(state_file)? {
        return Ok(record.dicom_directory);
    }

    let selected = source.resolve().ok_or(SyncError::NoDirectorySelected)?;
    if !selected.is_dir() {
        return Err(SyncError::DirectoryNotFound(selected));
    }

    DirectoryRecord {
        dicom_directory: selected.clone(),
    }
    .save(state_file)?;
    info!(
        "Selected source directory {} saved to {}",
        selected.display(),
        state_file.display()
    );

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    struct Fixed(Option<PathBuf>, usize);

    impl DirectorySource for Fixed {
        fn resolve(&mut self) -> Option<PathBuf> {
            self.1 += 1;
            self.0.clone()
        }
    }

    #[test]
    fn persisted_record_wins() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("config.json");
        fs::write(&state, r#"{"dicom_directory": "/srv/pacs"}"#).unwrap();

        let mut source = Fixed(Some(dir.path().to_owned()), 0);
        let resolved = resolve_source_directory(&state, &mut source).unwrap();

        assert_eq!(resolved, PathBuf::from("/srv/pacs"));
        assert_eq!(source.1, 0);
    }

    #[test]
    fn selection_is_persisted_once() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("config.json");
        let scans = dir.path().join("scans");
        fs::create_dir(&scans).unwrap();

        let mut source = Fixed(Some(scans.clone()), 0);
        assert_eq!(resolve_source_directory(&state, &mut source).unwrap(), scans);
        assert_eq!(resolve_source_directory(&state, &mut source).unwrap(), scans);
        assert_eq!(source.1, 1);

        let record = DirectoryRecord::load(&state).unwrap().unwrap();
        assert_eq!(record.dicom_directory, scans);
    }

    #[test]
    fn nothing_selected() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("config.json");

        let err = resolve_source_directory(&state, &mut Fixed(None, 0)).unwrap_err();
        assert!(matches!(err, SyncError::NoDirectorySelected));
        assert!(!state.exists());
    }

    #[test]
    fn missing_selection_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("config.json");
        let missing = dir.path().join("missing");

        let err = resolve_source_directory(&state, &mut Fixed(Some(missing), 0)).unwrap_err();
        assert!(matches!(err, SyncError::DirectoryNotFound(_)));
        assert!(!state.exists());
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("config.json");
        fs::write(&state, "{not json").unwrap();

        let err = DirectoryRecord::load(&state).unwrap_err();
        assert!(matches!(err, SyncError::State { .. }));
    }

    #[test]
    fn preset_is_returned_without_prompting() {
        let mut prompt = DirectoryPrompt::new(Some(PathBuf::from("/srv/pacs")));
        assert_eq!(prompt.resolve(), Some(PathBuf::from("/srv/pacs")));
    }
}
