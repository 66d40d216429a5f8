/*!
Registry of type managers and the snapshot capability handed to actions.
*/

use crate::entity::{ProtectedEntity, ProtectedEntityTypeManager};
use crate::{CustodyError, EntityId, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Resolve a live entity by identity and snapshot it
///
/// This is all the component annotator needs from the registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitySnapshotter: Send + Sync {
    /// Snapshot the live entity `id` and return its snapshotted identity
    async fn snapshot_entity(&self, id: &EntityId) -> Result<EntityId>;
}

/// Holds one type manager per entity type
///
/// Built once at startup and passed to whoever needs to resolve identities.
#[derive(Default)]
pub struct ProtectedEntityManager {
    type_managers: BTreeMap<String, Arc<dyn ProtectedEntityTypeManager>>,
}

impl ProtectedEntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type manager
    ///
    /// # Errors
    /// `Validation` if a manager for the same type is already registered.
    pub fn register(&mut self, manager: Arc<dyn ProtectedEntityTypeManager>) -> Result<()> {
        let type_name = manager.type_name().to_string();
        if self.type_managers.contains_key(&type_name) {
            return Err(CustodyError::validation(format!(
                "type manager for {type_name} is already registered"
            )));
        }
        debug!(entity_type = %type_name, "registered type manager");
        self.type_managers.insert(type_name, manager);
        Ok(())
    }

    pub fn type_manager(&self, type_name: &str) -> Option<Arc<dyn ProtectedEntityTypeManager>> {
        self.type_managers.get(type_name).cloned()
    }

    /// Registered type names, sorted
    pub fn entity_types(&self) -> Vec<&str> {
        self.type_managers.keys().map(String::as_str).collect()
    }

    /// Resolve `id` through the manager of its type
    pub async fn get_protected_entity(&self, id: &EntityId) -> Result<Arc<dyn ProtectedEntity>> {
        let manager = self
            .type_manager(id.entity_type())
            .ok_or_else(|| CustodyError::UnknownEntityType(id.entity_type().to_string()))?;
        manager.protected_entity(id).await
    }

    /// Snapshot capability that does not keep the registry alive
    pub fn snapshotter(self: &Arc<Self>) -> Arc<dyn EntitySnapshotter> {
        Arc::new(Arc::downgrade(self))
    }
}

#[async_trait]
impl EntitySnapshotter for ProtectedEntityManager {
    async fn snapshot_entity(&self, id: &EntityId) -> Result<EntityId> {
        let entity = self.get_protected_entity(id).await?;
        let snapshot = entity.snapshot().await?;
        entity.id().with_snapshot(snapshot)
    }
}

#[async_trait]
impl<T: EntitySnapshotter + 'static> EntitySnapshotter for Weak<T> {
    async fn snapshot_entity(&self, id: &EntityId) -> Result<EntityId> {
        let target = self
            .upgrade()
            .ok_or_else(|| CustodyError::Unavailable("protected entity manager was dropped".into()))?;
        target.snapshot_entity(id).await
    }
}
