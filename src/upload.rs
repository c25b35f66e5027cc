//! Conditional upload of a single file

use log::{info, warn};

use crate::{
    error::SyncError,
    remote::{ObjectMetadata, RemoteStore, exists},
    scan::LocalFile,
};

/// Result of handling one candidate file
#[derive(Debug)]
pub enum UploadOutcome {
    /// Transferred, carrying the id of the new remote object
    Uploaded(String),
    /// An object with the same name already exists
    Skipped,
    /// Existence check or transfer failed
    Failed(SyncError),
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, UploadOutcome::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UploadOutcome::Failed(_))
    }

    /// Failed because the credentials were rejected
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, UploadOutcome::Failed(e) if e.is_unauthorized())
    }
}

/// Upload `file` into the container unless an object with its name exists
///
/// Errors are logged and returned as [UploadOutcome::Failed], never propagated.
pub fn upload_if_absent<S: RemoteStore + ?Sized>(
    store: &S,
    file: &LocalFile,
    container_id: &str,
) -> UploadOutcome {
    match exists(store, &file.base_name, container_id) {
        Ok(true) => {
            info!(
                "File '{}' already exists remotely, skipping upload",
                file.base_name
            );
            return UploadOutcome::Skipped;
        }
        Ok(false) => {}
        Err(e) => {
            warn!("Failed to check {}: {e}", file.path.display());
            return UploadOutcome::Failed(e);
        }
    }

    let metadata = ObjectMetadata::new(&file.base_name, container_id);
    match store.create_object(&metadata, &file.path) {
        Ok(object) => {
            info!("Uploaded {} as {}", file.path.display(), object.id);
            UploadOutcome::Uploaded(object.id)
        }
        Err(source) => {
            let e = SyncError::UploadTransfer {
                path: file.path.clone(),
                source,
            };
            warn!("{e}");
            UploadOutcome::Failed(e)
        }
    }
}
