/*!
Namespace-backed composite entities.

A `k8sns` entity is one cluster namespace, identified by its UID. Its snapshot
is an archive of every object in the namespace, produced by the backup engine
through the [`SnapshotPipeline`](crate::pipeline::SnapshotPipeline). While the
archive is written, [`ComponentSnapshotAction`] snapshots the objects that are
entities in their own right and records their snapshotted identities on the
archived items, where [`ComponentDiscoverer`](crate::discovery::ComponentDiscoverer)
later finds them.
*/

mod component_action;
mod entity;
mod type_manager;

pub use component_action::ComponentSnapshotAction;
pub use entity::NamespaceEntity;
pub use type_manager::{NamespaceTypeManager, TYPE_NAME};
