use super::type_manager::NamespaceTypeManager;
use crate::entity::{ProtectedEntity, ProtectedEntityInfo};
use crate::repository::BoxedReader;
use crate::{CustodyError, EntityId, Result, SnapshotId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// A namespace, live or frozen at a snapshot
pub struct NamespaceEntity {
    manager: NamespaceTypeManager,
    id: EntityId,
    name: String,
}

impl NamespaceEntity {
    pub(super) fn new(manager: NamespaceTypeManager, id: EntityId, name: String) -> Self {
        Self { manager, id, name }
    }
}

#[async_trait]
impl ProtectedEntity for NamespaceEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<ProtectedEntityInfo> {
        let inner = &self.manager.inner;
        let size = if self.id.has_snapshot() {
            Some(inner.pipeline.repository().metadata(&self.id).await?.size_bytes)
        } else {
            None
        };
        let components = self.components().await?;
        Ok(ProtectedEntityInfo::with_s3_transports(
            self.id.clone(),
            self.name.clone(),
            size,
            inner.s3_url_base.as_deref(),
            components,
        ))
    }

    #[instrument(skip(self), fields(entity = %self.id, namespace = %self.name))]
    async fn snapshot(&self) -> Result<SnapshotId> {
        if self.id.has_snapshot() {
            return Err(CustodyError::AlreadySnapshotted(self.id.to_string()));
        }
        self.manager
            .inner
            .pipeline
            .run(&self.id, &self.name, self.manager.actions())
            .await
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotId>> {
        self.manager
            .inner
            .pipeline
            .repository()
            .list_snapshots(&self.id.without_snapshot())
            .await
    }

    async fn components(&self) -> Result<Vec<EntityId>> {
        self.manager.inner.discoverer.discover(&self.id).await
    }

    /// Stored archive of a snapshot, or a freshly streamed archive of the
    /// live namespace without running any actions
    async fn data_reader(&self) -> Result<BoxedReader> {
        let pipeline = &self.manager.inner.pipeline;
        if self.id.has_snapshot() {
            return pipeline.repository().read_stream(&self.id).await;
        }
        Ok(Box::new(pipeline.stream(&self.name, Arc::new(Vec::new()))))
    }
}
