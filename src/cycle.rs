//! One synchronization pass over the source directory

use std::fmt;

use log::{error, info, warn};

use crate::{
    auth::CredentialProvider,
    config::Config,
    directory::{DirectorySource, resolve_source_directory},
    error::SyncError,
    scan::{LocalFile, scan},
    upload::{UploadOutcome, upload_if_absent},
};

/// Outcomes of one cycle in scan order
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(LocalFile, UploadOutcome)>,
}

impl CycleReport {
    pub fn found(&self) -> usize {
        self.outcomes.len()
    }

    pub fn uploaded(&self) -> usize {
        self.count(UploadOutcome::is_uploaded)
    }

    pub fn skipped(&self) -> usize {
        self.count(UploadOutcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(UploadOutcome::is_failed)
    }

    fn count(&self, f: impl Fn(&UploadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| f(o)).count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {}, uploaded {}, skipped {}, failed {}",
            self.found(),
            self.uploaded(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Scan and upload cycle
pub struct SyncCycle<D, C> {
    config: Config,
    directories: D,
    credentials: C,
}

impl<D: DirectorySource, C: CredentialProvider> SyncCycle<D, C> {
    pub fn new(config: Config, directories: D, credentials: C) -> Self {
        Self {
            config,
            directories,
            credentials,
        }
    }

    /// Run one cycle, logging instead of returning errors
    pub fn run(&mut self) -> Option<CycleReport> {
        match self.try_run() {
            Ok(report) => {
                info!("Cycle finished: {report}");
                Some(report)
            }
            Err(SyncError::NoDirectorySelected) => {
                warn!("No directory selected, skipping this cycle");
                None
            }
            Err(e) => {
                error!("Cycle aborted: {e}");
                None
            }
        }
    }

    /// Run one cycle
    ///
    /// Fails before any upload if the directory cannot be resolved,
    /// no client can be obtained or the directory cannot be scanned.
    /// Failures of single files are part of the report. A file rejected for
    /// its credentials is retried once after renewing them, and the cycle
    /// aborts if they cannot be renewed.
    pub fn try_run(&mut self) -> Result<CycleReport, SyncError> {
        let source = resolve_source_directory(&self.config.state_file, &mut self.directories)?;
        let mut client = self.credentials.obtain()?;

        let files = scan(&source, &self.config.file_suffix)?;
        info!(
            "Found {} '{}' files in {}",
            files.len(),
            self.config.file_suffix,
            source.display()
        );

        let container = self.config.remote_container_id.as_str();
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let mut outcome = upload_if_absent(&client, &file, container);
            if outcome.is_unauthorized() {
                warn!(
                    "Credentials were rejected, renewing them and retrying {}",
                    file.base_name
                );
                self.credentials.refresh()?;
                client = self.credentials.obtain()?;
                outcome = upload_if_absent(&client, &file, container);
            }
            outcomes.push((file, outcome));
        }

        Ok(CycleReport { outcomes })
    }
}
