//! Remote store contract and the existence check

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, SyncError};

/// Object stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
}

/// Query for objects with an exact name inside one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectQuery {
    pub name: String,
    pub container_id: String,
}

impl ObjectQuery {
    pub fn new(name: &str, container_id: &str) -> Self {
        Self {
            name: name.to_owned(),
            container_id: container_id.to_owned(),
        }
    }
}

/// Metadata attached to a newly created object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub name: String,
    pub parents: Vec<String>,
}

impl ObjectMetadata {
    pub fn new(name: &str, container_id: &str) -> Self {
        Self {
            name: name.to_owned(),
            parents: vec![container_id.to_owned()],
        }
    }
}

/// Remote object storage
///
/// Implementations block until the remote call completes.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteStore {
    /// List objects matching `query`
    fn list_objects(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Create an object from the file at `content`
    fn create_object(
        &self,
        metadata: &ObjectMetadata,
        content: &Path,
    ) -> Result<RemoteObject, RemoteError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for &S {
    fn list_objects(&self, query: &ObjectQuery) -> Result<Vec<RemoteObject>, RemoteError> {
        (**self).list_objects(query)
    }

    fn create_object(
        &self,
        metadata: &ObjectMetadata,
        content: &Path,
    ) -> Result<RemoteObject, RemoteError> {
        (**self).create_object(metadata, content)
    }
}

/// Check whether an object called `name` exists in the container
///
/// Never retries, a failed query is reported to the caller.
pub fn exists<S: RemoteStore + ?Sized>(
    store: &S,
    name: &str,
    container_id: &str,
) -> Result<bool, SyncError> {
    let found = store
        .list_objects(&ObjectQuery::new(name, container_id))
        .map_err(|source| SyncError::RemoteQuery {
            name: name.to_owned(),
            source,
        })?;

    debug!("Query for '{name}' returned {} objects", found.len());
    Ok(!found.is_empty())
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    #[test]
    fn present_when_query_returns_objects() {
        let mut store = MockRemoteStore::new();
        store
            .expect_list_objects()
            .with(eq(ObjectQuery::new("a.dcm", "folder")))
            .times(1)
            .returning(|q| {
                Ok(vec![RemoteObject {
                    id: "1".into(),
                    name: q.name.clone(),
                }])
            });

        assert!(exists(&store, "a.dcm", "folder").unwrap());
    }

    #[test]
    fn absent_when_query_is_empty() {
        let mut store = MockRemoteStore::new();
        store.expect_list_objects().returning(|_| Ok(Vec::new()));

        assert!(!exists(&store, "a.dcm", "folder").unwrap());
    }

    #[test]
    fn query_failure_is_reported_once() {
        let mut store = MockRemoteStore::new();
        store
            .expect_list_objects()
            .times(1)
            .returning(|_| Err(RemoteError::Protocol("connection reset".into())));

        let err = exists(&store, "a.dcm", "folder").unwrap_err();
        assert!(matches!(err, SyncError::RemoteQuery { ref name, .. } if name == "a.dcm"));
    }

    #[test]
    fn metadata_targets_container() {
        let metadata = ObjectMetadata::new("a.dcm", "folder");
        assert_eq!(metadata.parents, ["folder"]);
        assert_eq!(
            serde_json::to_value(&metadata).unwrap(),
            serde_json::json!({ "name": "a.dcm", "parents": ["folder"] })
        );
    }
}
