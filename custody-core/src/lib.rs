/*!
# Custody Core

Protected-entity snapshots and component graphs.

This crate lets a backup orchestrator treat heterogeneous resources (a
namespace, a database, a custom resource) as uniformly addressable,
snapshot-able protected entities, and lets the snapshot of one entity capture
snapshots of the entities it contains:

- [`EntityId`] names an entity and, optionally, one snapshot of it
- [`pipeline::SnapshotPipeline`] streams a composite entity through the backup
  engine into a [`repository::SnapshotRepository`] over a bounded pipe
- [`k8sns::ComponentSnapshotAction`] snapshots nested entities while the
  archive is written and records them as item annotations
- [`discovery::ComponentDiscoverer`] recovers those references as the
  snapshot's component graph

## Architecture

Storage, the cluster API and the backup engine sit behind traits
([`repository::SnapshotRepository`], [`cluster::ClusterClient`],
[`engine::BackupEngine`]); type managers are registered in an explicit
[`manager::ProtectedEntityManager`] built at startup by
[`bootstrap::bootstrap`].

## Usage

```rust,no_run
use custody_core::{bootstrap, CustodyConfig, EntityId, StaticCluster};
use std::sync::Arc;

# async fn run() -> custody_core::Result<()> {
let cluster = StaticCluster::from_file("cluster.json")?;
let manager = bootstrap::bootstrap(&CustodyConfig::default(), Arc::new(cluster))?;

let id = EntityId::parse("k8sns:uid-1")?;
let namespace = manager.get_protected_entity(&id).await?;
let snapshot = namespace.snapshot().await?;

let frozen = manager.get_protected_entity(&id.with_snapshot(snapshot)?).await?;
for component in frozen.components().await? {
    println!("{component}");
}
# Ok(())
# }
```
*/

pub mod action;
pub mod archive;
pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod entity;
pub mod error;
pub mod graph;
pub mod identity;
pub mod k8sns;
pub mod manager;
pub mod metadata;
pub mod observability;
pub mod pipe;
pub mod pipeline;
pub mod repository;
pub mod resource;
pub mod resource_entity;

pub use cluster::{ClusterClient, NamespaceInfo, StaticCluster};
pub use config::{CustodyConfig, RepositoryBackend, RepositoryConfig};
pub use entity::{ProtectedEntity, ProtectedEntityInfo, ProtectedEntityTypeManager};
pub use error::{CustodyError, Result};
pub use identity::{EntityId, SnapshotId};
pub use manager::{EntitySnapshotter, ProtectedEntityManager};
pub use metadata::SnapshotRecord;
pub use repository::{
    create_repository_from_config, LocalSnapshotRepository, MemorySnapshotRepository,
    SnapshotRepository,
};
pub use resource::{ClusterResource, COMPONENT_SNAPSHOT_ANNOTATION};
