/*!
Local filesystem snapshot repository.
*/

use super::{require_snapshot, BoxedReader, SnapshotRepository};
use crate::{CustodyError, EntityId, Result, SnapshotId, SnapshotRecord};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const DATA_SUFFIX: &str = ".data";
const RECORD_SUFFIX: &str = ".record.json";
const PARTIAL_SUFFIX: &str = ".partial";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Repository storing each snapshot as a pair of files
///
/// Layout under the base directory:
/// ```text
/// <type>/<id>/<snapshot>.data          archive or manifest bytes
/// <type>/<id>/<snapshot>.record.json   SnapshotRecord, written last
/// ```
/// Both files are written under a `.partial` name and renamed into place, and
/// the record is renamed last, so a snapshot becomes listable only once its
/// data is complete.
///
/// # Example
/// ```rust,no_run
/// use custody_core::repository::LocalSnapshotRepository;
///
/// let repository = LocalSnapshotRepository::new("/var/lib/custody/snapshots");
/// assert!(repository.base_dir().ends_with("snapshots"));
/// ```
#[derive(Debug, Clone)]
pub struct LocalSnapshotRepository {
    base_dir: PathBuf,
}

impl LocalSnapshotRepository {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entity_dir(&self, id: &EntityId) -> PathBuf {
        self.base_dir
            .join(path_segment(id.entity_type()))
            .join(path_segment(id.id()))
    }

    fn snapshot_path(&self, id: &EntityId, snapshot: &SnapshotId, suffix: &str) -> PathBuf {
        self.entity_dir(id)
            .join(format!("{}{suffix}", path_segment(snapshot.as_str())))
    }

    async fn spool(source: &mut BoxedReader, path: &Path) -> Result<(Sha256, u64)> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            CustodyError::storage(format!("Failed to create {}: {e}", path.display()))
        })?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut size = 0u64;

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            size += n as u64;
        }

        file.sync_all().await?;
        Ok((hasher, size))
    }

    async fn commit_record(&self, record: &SnapshotRecord, snapshot: &SnapshotId) -> Result<()> {
        let record_path = self.snapshot_path(&record.id, snapshot, RECORD_SUFFIX);
        let partial = self.snapshot_path(
            &record.id,
            snapshot,
            &format!("{RECORD_SUFFIX}{PARTIAL_SUFFIX}"),
        );

        let body = serde_json::to_vec_pretty(record)?;
        let mut file = fs::File::create(&partial).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&partial, &record_path).await.map_err(|e| {
            CustodyError::storage(format!(
                "Failed to commit record {}: {e}",
                record_path.display()
            ))
        })
    }

    async fn read_record(&self, path: &Path) -> Result<SnapshotRecord> {
        let data = fs::read(path).await?;
        let record: SnapshotRecord = serde_json::from_slice(&data)?;
        if !record.is_compatible() {
            return Err(CustodyError::storage(format!(
                "Incompatible snapshot record version {} at {}",
                record.format_version,
                path.display()
            )));
        }
        record.validate()?;
        Ok(record)
    }
}

#[async_trait]
impl SnapshotRepository for LocalSnapshotRepository {
    async fn write_entity(
        &self,
        mut source: BoxedReader,
        id: &EntityId,
        name: &str,
    ) -> Result<SnapshotRecord> {
        let snapshot = require_snapshot(id)?;
        let dir = self.entity_dir(id);
        fs::create_dir_all(&dir).await.map_err(|e| {
            CustodyError::storage(format!("Failed to create directory {}: {e}", dir.display()))
        })?;

        let record_path = self.snapshot_path(id, snapshot, RECORD_SUFFIX);
        if fs::try_exists(&record_path).await.unwrap_or(false) {
            return Err(CustodyError::storage(format!("Snapshot {id} already exists")));
        }

        let data_path = self.snapshot_path(id, snapshot, DATA_SUFFIX);
        let partial = self.snapshot_path(id, snapshot, &format!("{DATA_SUFFIX}{PARTIAL_SUFFIX}"));

        let (hasher, size) = match Self::spool(&mut source, &partial).await {
            Ok(spooled) => spooled,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        fs::rename(&partial, &data_path).await.map_err(|e| {
            CustodyError::storage(format!("Failed to commit data {}: {e}", data_path.display()))
        })?;

        let record = SnapshotRecord::new(id.clone(), name).with_content(hasher, size);
        if let Err(e) = self.commit_record(&record, snapshot).await {
            let _ = fs::remove_file(&data_path).await;
            return Err(e);
        }

        info!(entity = %id, bytes = size, "snapshot committed to local repository");
        Ok(record)
    }

    async fn read_stream(&self, id: &EntityId) -> Result<BoxedReader> {
        let snapshot = require_snapshot(id)?;
        let record_path = self.snapshot_path(id, snapshot, RECORD_SUFFIX);
        if !fs::try_exists(&record_path).await.unwrap_or(false) {
            return Err(CustodyError::not_found(format!("snapshot {id}")));
        }

        let data_path = self.snapshot_path(id, snapshot, DATA_SUFFIX);
        let file = fs::File::open(&data_path).await.map_err(|e| {
            CustodyError::storage(format!("Failed to open {}: {e}", data_path.display()))
        })?;
        Ok(Box::new(file))
    }

    async fn list_snapshots(&self, id: &EntityId) -> Result<Vec<SnapshotId>> {
        let dir = self.entity_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CustodyError::storage(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )))
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if !file_name.to_string_lossy().ends_with(RECORD_SUFFIX) {
                continue;
            }
            match self.read_record(&entry.path()).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping unreadable snapshot record"),
            }
        }

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!(entity = %id, count = records.len(), "listed snapshots");
        Ok(records
            .into_iter()
            .filter_map(|record| record.id.snapshot().cloned())
            .collect())
    }

    async fn metadata(&self, id: &EntityId) -> Result<SnapshotRecord> {
        let snapshot = require_snapshot(id)?;
        let record_path = self.snapshot_path(id, snapshot, RECORD_SUFFIX);
        match self.read_record(&record_path).await {
            Err(CustodyError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(CustodyError::not_found(format!("snapshot {id}")))
            }
            other => other,
        }
    }

    async fn delete_snapshot(&self, id: &EntityId) -> Result<()> {
        let snapshot = require_snapshot(id)?;
        // Record first, so the snapshot stops being listed before its data goes.
        for suffix in [RECORD_SUFFIX, DATA_SUFFIX] {
            let path = self.snapshot_path(id, snapshot, suffix);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CustodyError::storage(format!(
                        "Failed to delete {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        debug!(entity = %id, "snapshot deleted");
        Ok(())
    }
}

/// Encode an identity segment as a single safe path component
fn path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            b'.' if raw != "." && raw != ".." => out.push('.'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
