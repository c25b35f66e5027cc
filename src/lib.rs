//! Upload files from a local directory to a Google Drive folder
//!
//! A cycle scans the source directory for files with a configured suffix and
//! uploads every file whose name does not exist in the destination folder yet.
//! The [Scheduler] repeats cycles at a fixed interval.

pub mod auth;
pub mod config;
pub mod cycle;
pub mod directory;
pub mod drive;
pub mod error;
pub mod remote;
pub mod scan;
pub mod schedule;
pub mod upload;

pub use auth::{CredentialProvider, OAuthCredentials};
pub use config::Config;
pub use cycle::{CycleReport, SyncCycle};
pub use directory::{DirectoryPrompt, DirectorySource};
pub use drive::DriveClient;
pub use error::{RemoteError, SyncError};
pub use remote::{RemoteObject, RemoteStore};
pub use scan::{LocalFile, scan};
pub use schedule::{Scheduler, SystemClock};
pub use upload::{UploadOutcome, upload_if_absent};
