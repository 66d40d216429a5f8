/*!
Protected entities and the per-type managers that produce them.

A protected entity is anything that can be snapshotted and addressed by an
[`EntityId`]: a namespace, a database, a custom resource. Entities are cheap
views built on demand by their type manager; all durable state lives in the
snapshot repository.
*/

use crate::repository::BoxedReader;
use crate::{CustodyError, EntityId, Result, SnapshotId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transport type of S3 object descriptors
pub const S3_TRANSPORT: &str = "s3";

/// Where and how one facet of an entity can be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTransport {
    pub transport_type: String,
    pub params: BTreeMap<String, String>,
}

impl DataTransport {
    fn s3(url: String) -> Self {
        Self {
            transport_type: S3_TRANSPORT.to_string(),
            params: BTreeMap::from([("url".to_string(), url)]),
        }
    }

    /// Descriptor of the entity data object `<base><id>`
    pub fn s3_data(base: &str, id: &EntityId) -> Self {
        Self::s3(format!("{base}{id}"))
    }

    /// Descriptor of the entity metadata object `<base><id>.md`
    pub fn s3_metadata(base: &str, id: &EntityId) -> Self {
        Self::s3(format!("{base}{id}.md"))
    }

    /// Descriptor of the combined data and metadata object `<base><id>.zip`
    pub fn s3_combined(base: &str, id: &EntityId) -> Self {
        Self::s3(format!("{base}{id}.zip"))
    }

    pub fn url(&self) -> Option<&str> {
        self.params.get("url").map(String::as_str)
    }
}

/// Description of a protected entity as returned by [`ProtectedEntity::info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedEntityInfo {
    pub id: EntityId,
    pub name: String,
    /// Stored size of a snapshot; `None` while unknown (live entities)
    pub size: Option<u64>,
    pub data: Vec<DataTransport>,
    pub metadata: Vec<DataTransport>,
    pub combined: Vec<DataTransport>,
    pub components: Vec<EntityId>,
}

impl ProtectedEntityInfo {
    /// Build an info carrying the standard S3 transports for `id`
    ///
    /// Without an `s3_base` the transport lists are empty.
    pub fn with_s3_transports(
        id: EntityId,
        name: String,
        size: Option<u64>,
        s3_base: Option<&str>,
        components: Vec<EntityId>,
    ) -> Self {
        let (data, metadata, combined) = match s3_base {
            Some(base) => (
                vec![DataTransport::s3_data(base, &id)],
                vec![DataTransport::s3_metadata(base, &id)],
                vec![DataTransport::s3_combined(base, &id)],
            ),
            None => (Vec::new(), Vec::new(), Vec::new()),
        };
        Self {
            id,
            name,
            size,
            data,
            metadata,
            combined,
            components,
        }
    }
}

/// Options for creating an entity from another one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyCreateOptions {
    /// Fail if the target already exists
    #[default]
    AllocateNew,
    /// Replace an existing target
    UpdateExisting,
    /// Replace an existing target or allocate a new one
    AllocateNewOrUpdateExisting,
}

/// A snapshot-able entity, live or frozen at a snapshot
#[async_trait]
pub trait ProtectedEntity: Send + Sync {
    fn id(&self) -> &EntityId;

    /// Human-readable name (namespace name, resource name)
    fn name(&self) -> &str;

    async fn info(&self) -> Result<ProtectedEntityInfo>;

    /// Take a new snapshot of a live entity
    ///
    /// # Errors
    /// `AlreadySnapshotted` when called on a snapshotted identity.
    async fn snapshot(&self) -> Result<SnapshotId>;

    /// Snapshots recorded for this entity, oldest first
    async fn list_snapshots(&self) -> Result<Vec<SnapshotId>>;

    /// Snapshotted identities of the entities captured with this snapshot
    ///
    /// Live entities have no recorded components and return an empty list.
    async fn components(&self) -> Result<Vec<EntityId>>;

    /// Raw data stream: stored bytes for a snapshot, current contents if live
    async fn data_reader(&self) -> Result<BoxedReader>;

    async fn delete_snapshot(&self, _snapshot: &SnapshotId) -> Result<bool> {
        Err(CustodyError::not_implemented("delete_snapshot"))
    }

    async fn overwrite(&self, _source: Arc<dyn ProtectedEntity>, _with_components: bool) -> Result<()> {
        Err(CustodyError::not_implemented("overwrite"))
    }
}

/// Factory and registry of the entities of one type
#[async_trait]
pub trait ProtectedEntityTypeManager: Send + Sync {
    fn type_name(&self) -> &str;

    /// Identities of every live entity of this type
    async fn protected_entities(&self) -> Result<Vec<EntityId>>;

    /// Resolve a live or snapshotted identity
    ///
    /// # Errors
    /// `NotFound` if no live entity or recorded snapshot matches.
    async fn protected_entity(&self, id: &EntityId) -> Result<Arc<dyn ProtectedEntity>>;

    async fn copy(
        &self,
        _source: Arc<dyn ProtectedEntity>,
        _options: CopyCreateOptions,
    ) -> Result<Arc<dyn ProtectedEntity>> {
        Err(CustodyError::not_implemented("copy"))
    }

    async fn copy_from_info(
        &self,
        _info: ProtectedEntityInfo,
        _options: CopyCreateOptions,
    ) -> Result<Arc<dyn ProtectedEntity>> {
        Err(CustodyError::not_implemented("copy_from_info"))
    }

    async fn delete(&self, _id: &EntityId) -> Result<()> {
        Err(CustodyError::not_implemented("delete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_transport_urls() {
        let id = EntityId::new("k8sns", "uid-1")
            .with_snapshot(SnapshotId::new("s1"))
            .unwrap();
        let base = "https://s3.example.com/bucket/";

        assert_eq!(
            DataTransport::s3_data(base, &id).url(),
            Some("https://s3.example.com/bucket/k8sns:uid-1:s1")
        );
        assert_eq!(
            DataTransport::s3_metadata(base, &id).url(),
            Some("https://s3.example.com/bucket/k8sns:uid-1:s1.md")
        );
        assert_eq!(
            DataTransport::s3_combined(base, &id).url(),
            Some("https://s3.example.com/bucket/k8sns:uid-1:s1.zip")
        );
    }

    #[test]
    fn test_info_without_s3_base_has_no_transports() {
        let info = ProtectedEntityInfo::with_s3_transports(
            EntityId::new("psql", "db-42"),
            "orders".to_string(),
            None,
            None,
            Vec::new(),
        );
        assert!(info.data.is_empty() && info.metadata.is_empty() && info.combined.is_empty());
    }
}
