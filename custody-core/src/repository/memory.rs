/*!
In-memory snapshot repository.
*/

use super::{require_snapshot, BoxedReader, SnapshotRepository};
use crate::{CustodyError, EntityId, Result, SnapshotId, SnapshotRecord};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone)]
struct StoredSnapshot {
    record: SnapshotRecord,
    data: Bytes,
}

/// Repository keeping every snapshot in memory
///
/// Useful for tests and for dry runs; contents are lost when the last clone
/// is dropped. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotRepository {
    snapshots: Arc<Mutex<HashMap<EntityId, Vec<StoredSnapshot>>>>,
}

impl MemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, id: &EntityId) -> Result<StoredSnapshot> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots
            .get(&id.without_snapshot())
            .and_then(|stored| stored.iter().find(|s| s.record.id == *id))
            .cloned()
            .ok_or_else(|| CustodyError::not_found(format!("snapshot {id}")))
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshotRepository {
    async fn write_entity(
        &self,
        mut source: BoxedReader,
        id: &EntityId,
        name: &str,
    ) -> Result<SnapshotRecord> {
        require_snapshot(id)?;

        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;

        let mut hasher = Sha256::new();
        hasher.update(&data);
        let record = SnapshotRecord::new(id.clone(), name).with_content(hasher, data.len() as u64);

        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = snapshots.entry(id.without_snapshot()).or_default();
        if stored.iter().any(|s| s.record.id == *id) {
            return Err(CustodyError::storage(format!("Snapshot {id} already exists")));
        }
        stored.push(StoredSnapshot {
            record: record.clone(),
            data: Bytes::from(data),
        });
        Ok(record)
    }

    async fn read_stream(&self, id: &EntityId) -> Result<BoxedReader> {
        require_snapshot(id)?;
        let stored = self.find(id)?;
        Ok(Box::new(Cursor::new(stored.data)))
    }

    async fn list_snapshots(&self, id: &EntityId) -> Result<Vec<SnapshotId>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots
            .get(&id.without_snapshot())
            .map(|stored| {
                stored
                    .iter()
                    .filter_map(|s| s.record.id.snapshot().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn metadata(&self, id: &EntityId) -> Result<SnapshotRecord> {
        require_snapshot(id)?;
        Ok(self.find(id)?.record)
    }

    async fn delete_snapshot(&self, id: &EntityId) -> Result<()> {
        require_snapshot(id)?;
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = snapshots.get_mut(&id.without_snapshot()) {
            stored.retain(|s| s.record.id != *id);
        }
        Ok(())
    }
}
