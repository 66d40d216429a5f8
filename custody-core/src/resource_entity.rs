/*!
Leaf entity type backed by a single cluster resource kind.

Each object of the kind is one protected entity identified by its UID. A
snapshot stores the object's JSON manifest; leaf entities have no components.
*/

use crate::cluster::ClusterClient;
use crate::entity::{ProtectedEntity, ProtectedEntityInfo, ProtectedEntityTypeManager};
use crate::repository::{BoxedReader, SnapshotRepository};
use crate::{ClusterResource, CustodyError, EntityId, Result, SnapshotId};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, instrument};

struct ResourceTypeInner {
    type_name: String,
    resource: String,
    cluster: Arc<dyn ClusterClient>,
    repository: Arc<dyn SnapshotRepository>,
    s3_url_base: Option<String>,
}

/// Type manager for entities of one resource kind, e.g. `psql` for
/// `postgresqls.acid.zalan.do`
#[derive(Clone)]
pub struct ResourceTypeManager {
    inner: Arc<ResourceTypeInner>,
}

impl ResourceTypeManager {
    pub fn new(
        type_name: impl Into<String>,
        resource: impl Into<String>,
        cluster: Arc<dyn ClusterClient>,
        repository: Arc<dyn SnapshotRepository>,
        s3_url_base: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceTypeInner {
                type_name: type_name.into(),
                resource: resource.into(),
                cluster,
                repository,
                s3_url_base,
            }),
        }
    }
}

#[async_trait]
impl ProtectedEntityTypeManager for ResourceTypeManager {
    fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    async fn protected_entities(&self) -> Result<Vec<EntityId>> {
        let items = self.inner.cluster.list_resources(&self.inner.resource).await?;
        items
            .iter()
            .map(|item| -> Result<EntityId> {
                Ok(EntityId::new(self.inner.type_name.as_str(), item.uid()?))
            })
            .collect()
    }

    async fn protected_entity(&self, id: &EntityId) -> Result<Arc<dyn ProtectedEntity>> {
        if id.entity_type() != self.inner.type_name {
            return Err(CustodyError::UnknownEntityType(id.entity_type().to_string()));
        }

        if id.has_snapshot() {
            let record = self.inner.repository.metadata(id).await?;
            return Ok(Arc::new(ResourceEntity {
                manager: self.clone(),
                id: id.clone(),
                name: record.name,
                size: Some(record.size_bytes),
                item: None,
            }));
        }

        let items = self.inner.cluster.list_resources(&self.inner.resource).await?;
        let item = items
            .into_iter()
            .find(|item| item.uid().map(|uid| uid == id.id()).unwrap_or(false))
            .ok_or_else(|| CustodyError::not_found(format!("{} {}", self.inner.resource, id)))?;
        Ok(Arc::new(ResourceEntity {
            manager: self.clone(),
            id: id.clone(),
            name: item.name()?.to_string(),
            size: None,
            item: Some(item),
        }))
    }
}

/// One object of a [`ResourceTypeManager`]'s kind, live or snapshotted
pub struct ResourceEntity {
    manager: ResourceTypeManager,
    id: EntityId,
    name: String,
    size: Option<u64>,
    /// Current object, present for live entities only
    item: Option<ClusterResource>,
}

impl ResourceEntity {
    fn manifest(&self) -> Result<Vec<u8>> {
        let item = self
            .item
            .as_ref()
            .ok_or_else(|| CustodyError::AlreadySnapshotted(self.id.to_string()))?;
        Ok(serde_json::to_vec_pretty(&item.object)?)
    }
}

#[async_trait]
impl ProtectedEntity for ResourceEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<ProtectedEntityInfo> {
        Ok(ProtectedEntityInfo::with_s3_transports(
            self.id.clone(),
            self.name.clone(),
            self.size,
            self.manager.inner.s3_url_base.as_deref(),
            Vec::new(),
        ))
    }

    #[instrument(skip(self), fields(entity = %self.id))]
    async fn snapshot(&self) -> Result<SnapshotId> {
        if self.id.has_snapshot() {
            return Err(CustodyError::AlreadySnapshotted(self.id.to_string()));
        }

        let manifest = self.manifest()?;
        let snapshot = SnapshotId::generate();
        let snapshotted = self.id.with_snapshot(snapshot.clone())?;
        let record = self
            .manager
            .inner
            .repository
            .write_entity(Box::new(Cursor::new(manifest)), &snapshotted, &self.name)
            .await
            .map_err(|e| CustodyError::snapshot_failed(&self.id, e))?;

        info!(snapshot = %snapshot, bytes = record.size_bytes, "resource snapshot committed");
        Ok(snapshot)
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotId>> {
        self.manager
            .inner
            .repository
            .list_snapshots(&self.id.without_snapshot())
            .await
    }

    async fn components(&self) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }

    async fn data_reader(&self) -> Result<BoxedReader> {
        if self.id.has_snapshot() {
            return self.manager.inner.repository.read_stream(&self.id).await;
        }
        Ok(Box::new(Cursor::new(self.manifest()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockClusterClient, NamespaceInfo, StaticCluster};
    use crate::repository::MemorySnapshotRepository;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    const KIND: &str = "postgresqls.acid.zalan.do";

    fn psql_manager() -> ResourceTypeManager {
        let cluster = StaticCluster::new().with_namespace(
            NamespaceInfo::new("shop", "uid-1"),
            vec![ClusterResource::new(
                KIND,
                json!({"metadata": {"name": "orders", "uid": "db-42"}}),
            )],
        );
        ResourceTypeManager::new(
            "psql",
            KIND,
            Arc::new(cluster),
            Arc::new(MemorySnapshotRepository::new()),
            None,
        )
    }

    #[tokio::test]
    async fn test_lists_entities_by_uid() {
        let manager = psql_manager();
        let ids = manager.protected_entities().await.unwrap();
        assert_eq!(ids, vec![EntityId::new("psql", "db-42")]);
    }

    #[tokio::test]
    async fn test_snapshot_stores_manifest() {
        let manager = psql_manager();
        let live = manager
            .protected_entity(&EntityId::new("psql", "db-42"))
            .await
            .unwrap();
        assert_eq!(live.name(), "orders");

        let snapshot = live.snapshot().await.unwrap();
        assert_eq!(live.list_snapshots().await.unwrap(), vec![snapshot.clone()]);

        let frozen = manager
            .protected_entity(&live.id().with_snapshot(snapshot).unwrap())
            .await
            .unwrap();
        assert_eq!(frozen.name(), "orders");
        assert!(matches!(frozen.snapshot().await, Err(CustodyError::AlreadySnapshotted(_))));

        let mut data = Vec::new();
        frozen.data_reader().await.unwrap().read_to_end(&mut data).await.unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(manifest["metadata"]["uid"], "db-42");
        assert!(frozen.info().await.unwrap().size.is_some());
    }

    #[tokio::test]
    async fn test_unknown_uid_is_not_found() {
        let manager = psql_manager();
        let result = manager.protected_entity(&EntityId::new("psql", "db-0")).await;
        assert!(matches!(result, Err(CustodyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cluster_failure_propagates() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_resources()
            .returning(|_| Err(CustodyError::cluster("forbidden")));
        let manager = ResourceTypeManager::new(
            "psql",
            KIND,
            Arc::new(cluster),
            Arc::new(MemorySnapshotRepository::new()),
            None,
        );

        assert!(matches!(
            manager.protected_entities().await,
            Err(CustodyError::Cluster(_))
        ));
    }
}
