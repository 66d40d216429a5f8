use super::entity::NamespaceEntity;
use crate::action::{ActionList, BackupItemAction};
use crate::cluster::{ClusterClient, NamespaceInfo};
use crate::discovery::ComponentDiscoverer;
use crate::entity::{ProtectedEntity, ProtectedEntityTypeManager};
use crate::pipeline::SnapshotPipeline;
use crate::{CustodyError, EntityId, Result};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Entity type name of namespaces
pub const TYPE_NAME: &str = "k8sns";

pub(super) struct NamespaceTypeInner {
    pub(super) cluster: Arc<dyn ClusterClient>,
    pub(super) pipeline: SnapshotPipeline,
    pub(super) discoverer: ComponentDiscoverer,
    pub(super) s3_url_base: Option<String>,
    actions: OnceLock<ActionList>,
}

/// Type manager for `k8sns` entities
///
/// Clones share state. Backup item actions are registered once with
/// [`set_actions`](Self::set_actions) before the first snapshot; the first
/// snapshot freezes the list.
#[derive(Clone)]
pub struct NamespaceTypeManager {
    pub(super) inner: Arc<NamespaceTypeInner>,
}

impl NamespaceTypeManager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        pipeline: SnapshotPipeline,
        discoverer: ComponentDiscoverer,
        s3_url_base: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(NamespaceTypeInner {
                cluster,
                pipeline,
                discoverer,
                s3_url_base,
                actions: OnceLock::new(),
            }),
        }
    }

    /// Register the actions run on every archived item
    ///
    /// # Errors
    /// `Validation` if actions were already registered or a snapshot already
    /// ran with the empty list.
    pub fn set_actions(&self, actions: Vec<Arc<dyn BackupItemAction>>) -> Result<()> {
        let count = actions.len();
        self.inner
            .actions
            .set(Arc::new(actions))
            .map_err(|_| CustodyError::validation("k8sns actions are already registered"))?;
        debug!(actions = count, "k8sns backup item actions registered");
        Ok(())
    }

    pub(super) fn actions(&self) -> ActionList {
        Arc::clone(self.inner.actions.get_or_init(|| Arc::new(Vec::new())))
    }

    async fn namespace_for(&self, id: &EntityId) -> Result<NamespaceInfo> {
        self.inner
            .cluster
            .list_namespaces()
            .await?
            .into_iter()
            .find(|ns| ns.uid == id.id())
            .ok_or_else(|| CustodyError::not_found(format!("namespace with uid {}", id.id())))
    }
}

#[async_trait]
impl ProtectedEntityTypeManager for NamespaceTypeManager {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    async fn protected_entities(&self) -> Result<Vec<EntityId>> {
        Ok(self
            .inner
            .cluster
            .list_namespaces()
            .await?
            .into_iter()
            .map(|ns| EntityId::new(TYPE_NAME, ns.uid))
            .collect())
    }

    async fn protected_entity(&self, id: &EntityId) -> Result<Arc<dyn ProtectedEntity>> {
        if id.entity_type() != TYPE_NAME {
            return Err(CustodyError::UnknownEntityType(id.entity_type().to_string()));
        }

        let name = if id.has_snapshot() {
            self.inner.pipeline.repository().metadata(id).await?.name
        } else {
            self.namespace_for(id).await?.name
        };
        Ok(Arc::new(NamespaceEntity::new(self.clone(), id.clone(), name)))
    }
}
