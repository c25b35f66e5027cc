//! Google Drive v3 implementation of [RemoteStore]
//!
//! Existence checks use `files.list` with a name and parent query.
//! Uploads use the resumable protocol: a session is opened with the metadata,
//! then the content is sent in chunks with `Content-Range` headers.
//! The server answers `308` while the upload is incomplete and reports the
//! persisted byte range, so an interrupted chunk is resent from that offset.

use std::{
    fs::File,
    io::{Read as _, Seek as _, SeekFrom},
    path::Path,
};

use log::{debug, warn};
use reqwest::{
    StatusCode,
    blocking::{Client, Response},
    header::{CONTENT_RANGE, LOCATION, RANGE},
};
use serde::Deserialize;

use crate::{
    error::RemoteError,
    remote::{ObjectMetadata, ObjectQuery, RemoteObject, RemoteStore},
};

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/";
pub const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3/";

/// Chunk resends per upload after transport or server errors, and
/// consecutive `308` answers without progress before giving up
const MAX_RESUME_ATTEMPTS: usize = 3;

/// Authenticated Drive client
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    access_token: String,
    chunk_size: usize,
    api: String,
    upload_api: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteObject>,
}

/// State of a resumable upload session
#[derive(Debug)]
enum UploadStatus {
    /// Bytes persisted so far
    Incomplete(u64),
    Complete(RemoteObject),
}

impl DriveClient {
    pub fn new(http: Client, access_token: &str, chunk_size: usize) -> Self {
        Self {
            http,
            access_token: access_token.to_owned(),
            chunk_size,
            api: DRIVE_API.into(),
            upload_api: DRIVE_UPLOAD_API.into(),
        }
    }

    /// Talk to other endpoints than the public Drive API, both ending in `/`
    pub fn with_endpoints(mut self, api: &str, upload_api: &str) -> Self {
        self.api = api.into();
        self.upload_api = upload_api.into();
        self
    }

    /// Open a resumable session and return its URI
    fn start_session(
        &self,
        metadata: &ObjectMetadata,
        total: u64,
        mime: &str,
    ) -> Result<String, RemoteError> {
        let response = self
            .http
            .post(format!("{}files", self.upload_api))
            .query(&[("uploadType", "resumable"), ("fields", "id,name")])
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Type", mime)
            .header("X-Upload-Content-Length", total)
            .json(metadata)
            .send()?;

        check_status(response)?
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::Protocol("upload session without Location header".into()))
    }

    fn put_chunk(
        &self,
        session: &str,
        chunk: Vec<u8>,
        offset: u64,
        total: u64,
    ) -> Result<UploadStatus, RemoteError> {
        let end = offset + chunk.len() as u64;
        let response = self
            .http
            .put(session)
            .header(CONTENT_RANGE, content_range(offset, end, total))
            .body(chunk)
            .send()?;
        upload_status(response)
    }

    /// Ask the server how much of the upload it has persisted
    fn query_status(&self, session: &str, total: u64) -> Result<UploadStatus, RemoteError> {
        let response = self
            .http
            .put(session)
            .header(CONTENT_RANGE, format!("bytes */{total}"))
            .body(Vec::new())
            .send()?;
        upload_status(response)
    }

    fn transfer(
        &self,
        session: &str,
        file: &mut File,
        total: u64,
    ) -> Result<RemoteObject, RemoteError> {
        let mut offset = 0;
        let mut resumes = 0;
        let mut stalls = 0;

        loop {
            if total > 0 && offset >= total {
                return Err(RemoteError::Protocol(format!(
                    "server did not finish the upload after {total} bytes"
                )));
            }

            file.seek(SeekFrom::Start(offset))?;
            let len = (self.chunk_size as u64).min(total - offset);
            let mut chunk = Vec::with_capacity(len as usize);
            (&mut *file).take(len).read_to_end(&mut chunk)?;
            if chunk.is_empty() && total > 0 {
                return Err(RemoteError::Protocol(format!(
                    "file shrank to {offset} bytes during upload"
                )));
            }

            let status = match self.put_chunk(session, chunk, offset, total) {
                Ok(status) => status,
                Err(e) if resumes < MAX_RESUME_ATTEMPTS && is_resumable(&e) => {
                    resumes += 1;
                    warn!(
                        "Chunk at offset {offset} failed ({e}), resuming ({resumes}/{MAX_RESUME_ATTEMPTS})"
                    );
                    self.query_status(session, total)?
                }
                Err(e) => return Err(e),
            };

            match status {
                UploadStatus::Complete(object) => return Ok(object),
                UploadStatus::Incomplete(persisted) => {
                    debug!("Server persisted {persisted} of {total} bytes");
                    if persisted > offset {
                        stalls = 0;
                    } else {
                        stalls += 1;
                        if stalls > MAX_RESUME_ATTEMPTS {
                            return Err(RemoteError::Protocol(format!(
                                "upload made no progress past {persisted} of {total} bytes"
                            )));
                        }
                    }
                    offset = persisted;
                }
            }
        }
    }
}

impl RemoteStore for DriveClient {
    fn list_objects(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>, RemoteError> {
        let response = self
            .http
            .get(format!("{}files", self.api))
            .query(&[("q", drive_query(query).as_str()), ("fields", "files(id,name)")])
            .bearer_auth(&self.access_token)
            .send()?;

        let list: FileList = check_status(response)?.json()?;
        Ok(list.files)
    }

    fn create_object(
        &self,
        metadata: &ObjectMetadata,
        content: &Path,
    ) -> Result<RemoteObject, RemoteError> {
        let mut file = File::open(content)?;
        let total = file.metadata()?.len();
        let mime = mime_guess::from_path(content).first_or_octet_stream();

        let session = self.start_session(metadata, total, mime.essence_str())?;
        debug!(
            "Opened upload session for {} ({total} bytes, {mime})",
            content.display()
        );

        self.transfer(&session, &mut file, total)
    }
}

/// Turn non-success responses into [RemoteError::Status]
pub(crate) fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(RemoteError::Status { status, body })
}

fn upload_status(response: Response) -> Result<UploadStatus, RemoteError> {
    if response.status() == StatusCode::PERMANENT_REDIRECT {
        let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
        return next_offset(range).map(UploadStatus::Incomplete);
    }
    Ok(UploadStatus::Complete(check_status(response)?.json()?))
}

fn is_resumable(e: &RemoteError) -> bool {
    match e {
        RemoteError::Http(_) => true,
        RemoteError::Status { status, .. } => status.is_server_error(),
        _ => false,
    }
}

/// Drive search query for an exact name inside a folder
fn drive_query(query: &ObjectQuery) -> String {
    format!(
        "name = '{}' and '{}' in parents",
        escape_query_value(&query.name),
        escape_query_value(&query.container_id)
    )
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `Content-Range` of the bytes `start..end` of an upload of `total` bytes
fn content_range(start: u64, end: u64, total: u64) -> String {
    if end == start {
        format!("bytes */{total}")
    } else {
        format!("bytes {start}-{}/{total}", end - 1)
    }
}

/// Offset to continue from given the `Range` header of a `308` response
fn next_offset(range: Option<&str>) -> Result<u64, RemoteError> {
    let Some(range) = range else {
        return Ok(0);
    };

    range
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| RemoteError::Protocol(format!("malformed Range header '{range}'")))
}
