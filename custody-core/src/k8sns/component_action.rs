use crate::action::{BackupItemAction, ResourceSelector};
use crate::engine::BackupRequest;
use crate::manager::EntitySnapshotter;
use crate::resource::COMPONENT_SNAPSHOT_ANNOTATION;
use crate::{ClusterResource, CustodyError, EntityId, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Backup item action snapshotting the items that are entities of their own
///
/// For each item whose resource kind maps to an entity type, the live entity
/// `(type, item UID)` is snapshotted and the item is annotated with the
/// resulting snapshotted identity before it is archived. Any failure fails
/// the whole parent snapshot. Every component snapshot taken is recorded in
/// the request's [`ComponentLog`](crate::engine::ComponentLog).
pub struct ComponentSnapshotAction {
    snapshotter: Arc<dyn EntitySnapshotter>,
    kinds: BTreeMap<String, String>,
}

impl ComponentSnapshotAction {
    /// # Arguments
    /// * `snapshotter` - Capability resolving and snapshotting a live entity
    /// * `kinds` - Resource kind to entity type table
    pub fn new(snapshotter: Arc<dyn EntitySnapshotter>, kinds: BTreeMap<String, String>) -> Self {
        Self { snapshotter, kinds }
    }
}

#[async_trait]
impl BackupItemAction for ComponentSnapshotAction {
    fn applies_to(&self) -> ResourceSelector {
        ResourceSelector::resources(self.kinds.keys().cloned())
    }

    async fn execute(&self, mut item: ClusterResource, request: &BackupRequest) -> Result<ClusterResource> {
        let Some(entity_type) = self.kinds.get(&item.resource) else {
            return Ok(item);
        };

        let uid = match item.uid() {
            Ok(uid) => uid.to_string(),
            Err(e) => {
                let name = item.name().unwrap_or("<unnamed>");
                return Err(CustodyError::component_failed(format!("{}/{}", item.resource, name), e));
            }
        };
        let component = EntityId::new(entity_type.as_str(), uid);

        let snapshotted = self
            .snapshotter
            .snapshot_entity(&component)
            .await
            .map_err(|e| CustodyError::component_failed(&component, e))?;
        request.components.record(snapshotted.clone());

        let mut annotations = item
            .annotations()
            .map_err(|e| CustodyError::component_failed(&component, e))?;
        annotations.insert(COMPONENT_SNAPSHOT_ANNOTATION.to_string(), snapshotted.to_string());
        item.set_annotations(&annotations)
            .map_err(|e| CustodyError::component_failed(&component, e))?;

        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::CustodyMetrics::global() {
            metrics.record_component_snapshot();
        }
        info!(backup = %request.name, component = %snapshotted, "component snapshot recorded");
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MockEntitySnapshotter;
    use crate::SnapshotId;
    use serde_json::json;

    const KIND: &str = "postgresqls.acid.zalan.do";

    fn kinds() -> BTreeMap<String, String> {
        BTreeMap::from([(KIND.to_string(), "psql".to_string())])
    }

    fn request() -> BackupRequest {
        BackupRequest::for_namespace(&SnapshotId::new("parent"), "shop")
    }

    fn database(annotations: serde_json::Value) -> ClusterResource {
        ClusterResource::new(
            KIND,
            json!({"metadata": {"name": "orders", "namespace": "shop", "uid": "db-42", "annotations": annotations}}),
        )
    }

    #[tokio::test]
    async fn test_annotates_item_with_component_snapshot() {
        let mut snapshotter = MockEntitySnapshotter::new();
        snapshotter
            .expect_snapshot_entity()
            .withf(|id| id.to_string() == "psql:db-42")
            .times(1)
            .returning(|id| id.with_snapshot(SnapshotId::new("child-1")));
        let action = ComponentSnapshotAction::new(Arc::new(snapshotter), kinds());

        let request = request();
        let item = action
            .execute(database(json!({"team": "payments"})), &request)
            .await
            .unwrap();

        let annotations = item.annotations().unwrap();
        assert_eq!(annotations[COMPONENT_SNAPSHOT_ANNOTATION], "psql:db-42:child-1");
        assert_eq!(annotations["team"], "payments");
        assert_eq!(
            request.components.entries(),
            vec![EntityId::parse("psql:db-42:child-1").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_unmapped_kind_passes_through() {
        let mut snapshotter = MockEntitySnapshotter::new();
        snapshotter.expect_snapshot_entity().never();
        let action = ComponentSnapshotAction::new(Arc::new(snapshotter), kinds());

        let item = ClusterResource::new("configmaps", json!({"metadata": {"name": "settings"}}));
        let out = action.execute(item.clone(), &request()).await.unwrap();
        assert_eq!(out, item);
    }

    #[tokio::test]
    async fn test_child_failure_fails_parent() {
        let mut snapshotter = MockEntitySnapshotter::new();
        snapshotter
            .expect_snapshot_entity()
            .returning(|id| Err(CustodyError::not_found(id.to_string())));
        let action = ComponentSnapshotAction::new(Arc::new(snapshotter), kinds());

        let request = request();
        let result = action.execute(database(json!(null)), &request).await;
        assert!(request.components.entries().is_empty());
        match result {
            Err(CustodyError::ComponentSnapshotFailed { component, .. }) => {
                assert_eq!(component, "psql:db-42");
            }
            other => panic!("expected ComponentSnapshotFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_selector_covers_mapped_kinds() {
        let action = ComponentSnapshotAction::new(Arc::new(MockEntitySnapshotter::new()), kinds());
        assert!(action.applies_to().matches(KIND));
        assert!(!action.applies_to().matches("pods"));
    }
}
