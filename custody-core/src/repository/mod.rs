/*!
Snapshot repositories.

This module defines the repository abstraction (port) that owns persisted
snapshot data and metadata, and its concrete implementations (adapters). The
pipeline and the type managers only see [`SnapshotRepository`], so the
storage backend can be swapped without touching them.
*/

pub mod local;
pub mod memory;

use crate::config::{RepositoryBackend, RepositoryConfig};
use crate::{EntityId, Result, SnapshotId, SnapshotRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub use local::LocalSnapshotRepository;
pub use memory::MemorySnapshotRepository;

/// Owned byte stream handed to or returned from a repository
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Durable store of snapshot data and metadata keyed by snapshotted identity
///
/// Implementations must keep concurrent writes under distinct identities
/// isolated, must not list a snapshot before its data and record are both
/// committed, and must make a committed snapshot visible to every later read.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Drain `source` and commit it as the data of the snapshotted `id`
    ///
    /// # Arguments
    /// * `source` - Stream to drain; a read error aborts the write
    /// * `id` - Snapshotted identity to store under
    /// * `name` - Human-readable entity name recorded alongside the data
    ///
    /// # Returns
    /// The committed record. Nothing is committed if an error is returned.
    async fn write_entity(&self, source: BoxedReader, id: &EntityId, name: &str)
        -> Result<SnapshotRecord>;

    /// Open the committed data of the snapshotted `id`
    async fn read_stream(&self, id: &EntityId) -> Result<BoxedReader>;

    /// Snapshots committed for the live `id`, oldest first
    async fn list_snapshots(&self, id: &EntityId) -> Result<Vec<SnapshotId>>;

    /// Recorded metadata of the snapshotted `id`
    async fn metadata(&self, id: &EntityId) -> Result<SnapshotRecord>;

    /// Remove a committed snapshot; removing an unknown snapshot is not an error
    async fn delete_snapshot(&self, id: &EntityId) -> Result<()>;
}

/// Build a repository from configuration
pub fn create_repository_from_config(
    config: &RepositoryConfig,
) -> Result<Arc<dyn SnapshotRepository>> {
    config.validate()?;

    match config.backend {
        RepositoryBackend::Local => {
            let base = config.local_base_path.clone().unwrap_or_else(|| "./snapshots".into());
            Ok(Arc::new(LocalSnapshotRepository::new(base)))
        }
        RepositoryBackend::Memory => Ok(Arc::new(MemorySnapshotRepository::new())),
    }
}

/// Reject identities without a snapshot where one is required
pub(crate) fn require_snapshot(id: &EntityId) -> Result<&SnapshotId> {
    id.snapshot().ok_or_else(|| {
        crate::CustodyError::validation(format!("{id} does not name a snapshot"))
    })
}
