/*!
Recursive walk over component graphs.

[`ProtectedEntity::components`](crate::entity::ProtectedEntity::components)
is flat: it returns the direct components of one snapshot. This module follows
those edges transitively.
*/

use crate::manager::ProtectedEntityManager;
use crate::{EntityId, Result};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// One parent to component edge found by [`walk_components`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentEdge {
    pub parent: EntityId,
    pub child: EntityId,
    /// Distance of `child` from the root (direct components have depth 1)
    pub depth: usize,
}

/// Walk the component graph below `root` breadth-first
///
/// Every edge is reported once. Each entity is expanded at most once, so a
/// graph with cycles terminates. Components whose type has no registered
/// manager are reported but not expanded.
///
/// # Errors
/// Fails if `root` or any expanded component cannot be resolved or its
/// components cannot be read.
pub async fn walk_components(
    manager: &ProtectedEntityManager,
    root: &EntityId,
) -> Result<Vec<ComponentEdge>> {
    let mut edges = Vec::new();
    let mut visited = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([(root.clone(), 0usize)]);

    while let Some((parent, depth)) = queue.pop_front() {
        let entity = manager.get_protected_entity(&parent).await?;
        for child in entity.components().await? {
            edges.push(ComponentEdge {
                parent: parent.clone(),
                child: child.clone(),
                depth: depth + 1,
            });
            if visited.insert(child.clone()) && manager.type_manager(child.entity_type()).is_some() {
                queue.push_back((child, depth + 1));
            }
        }
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ProtectedEntity, ProtectedEntityInfo, ProtectedEntityTypeManager};
    use crate::repository::BoxedReader;
    use crate::{CustodyError, SnapshotId};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Type manager serving a fixed adjacency list
    struct GraphTypeManager {
        edges: BTreeMap<String, Vec<EntityId>>,
    }

    struct GraphEntity {
        id: EntityId,
        components: Vec<EntityId>,
    }

    #[async_trait]
    impl ProtectedEntity for GraphEntity {
        fn id(&self) -> &EntityId {
            &self.id
        }

        fn name(&self) -> &str {
            self.id.id()
        }

        async fn info(&self) -> Result<ProtectedEntityInfo> {
            Err(CustodyError::not_implemented("info"))
        }

        async fn snapshot(&self) -> Result<SnapshotId> {
            Err(CustodyError::not_implemented("snapshot"))
        }

        async fn list_snapshots(&self) -> Result<Vec<SnapshotId>> {
            Ok(Vec::new())
        }

        async fn components(&self) -> Result<Vec<EntityId>> {
            Ok(self.components.clone())
        }

        async fn data_reader(&self) -> Result<BoxedReader> {
            Err(CustodyError::not_implemented("data_reader"))
        }
    }

    #[async_trait]
    impl ProtectedEntityTypeManager for GraphTypeManager {
        fn type_name(&self) -> &str {
            "node"
        }

        async fn protected_entities(&self) -> Result<Vec<EntityId>> {
            Ok(Vec::new())
        }

        async fn protected_entity(&self, id: &EntityId) -> Result<Arc<dyn ProtectedEntity>> {
            let components = self
                .edges
                .get(&id.to_string())
                .cloned()
                .ok_or_else(|| CustodyError::not_found(id.to_string()))?;
            Ok(Arc::new(GraphEntity {
                id: id.clone(),
                components,
            }))
        }
    }

    fn node(name: &str) -> EntityId {
        EntityId::new("node", name)
            .with_snapshot(SnapshotId::new("s"))
            .unwrap()
    }

    fn manager_with(edges: Vec<(&str, Vec<EntityId>)>) -> ProtectedEntityManager {
        let edges = edges
            .into_iter()
            .map(|(name, children)| (node(name).to_string(), children))
            .collect();
        let mut manager = ProtectedEntityManager::new();
        manager.register(Arc::new(GraphTypeManager { edges })).unwrap();
        manager
    }

    #[tokio::test]
    async fn test_walk_reports_depths() {
        let leaf = EntityId::new("psql", "db-42")
            .with_snapshot(SnapshotId::new("c"))
            .unwrap();
        let manager = manager_with(vec![
            ("root", vec![node("mid")]),
            ("mid", vec![leaf.clone()]),
        ]);

        let edges = walk_components(&manager, &node("root")).await.unwrap();
        assert_eq!(
            edges,
            vec![
                ComponentEdge { parent: node("root"), child: node("mid"), depth: 1 },
                ComponentEdge { parent: node("mid"), child: leaf, depth: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_terminates_on_cycles() {
        let manager = manager_with(vec![
            ("a", vec![node("b")]),
            ("b", vec![node("a"), node("b")]),
        ]);

        let edges = walk_components(&manager, &node("a")).await.unwrap();
        assert_eq!(edges.len(), 3);
        assert!(edges.iter().all(|edge| edge.depth <= 2));
    }

    #[tokio::test]
    async fn test_unknown_root_fails() {
        let manager = ProtectedEntityManager::new();
        let result = walk_components(&manager, &node("a")).await;
        assert!(matches!(result, Err(CustodyError::UnknownEntityType(_))));
    }
}
