/*!
Recorded metadata for a stored snapshot.
*/

use crate::{CustodyError, EntityId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current record format version for compatibility tracking
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// What the repository remembers about one snapshot besides its data
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// Snapshotted identity this record belongs to
    pub id: EntityId,

    /// Human-readable name of the entity at snapshot time (e.g. namespace name)
    pub name: String,

    /// When the snapshot was committed
    pub created_at: DateTime<Utc>,

    /// Size of the stored data in bytes
    pub size_bytes: u64,

    /// SHA-256 of the stored data
    pub content_hash: String,

    /// Format version for compatibility (current: 1)
    pub format_version: u8,
}

impl SnapshotRecord {
    /// Create a record for `id`; size and hash are filled in once data is written
    pub fn new<S: Into<String>>(id: EntityId, name: S) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            size_bytes: 0,
            content_hash: String::new(),
            format_version: RECORD_FORMAT_VERSION,
        }
    }

    /// Set the content hash and size from already-hashed data
    pub fn with_content(mut self, hasher: Sha256, size_bytes: u64) -> Self {
        self.content_hash = format!("{:x}", hasher.finalize());
        self.size_bytes = size_bytes;
        self
    }

    /// Compute SHA-256 of the provided data as lowercase hex
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Verify stored data against the recorded hash
    pub fn verify_integrity(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute_hash(data);
        if actual == self.content_hash {
            Ok(())
        } else {
            Err(CustodyError::storage(format!(
                "integrity check failed for {}: expected hash {}, got {}",
                self.id, self.content_hash, actual
            )))
        }
    }

    /// Validate that all required fields are properly set
    pub fn validate(&self) -> Result<()> {
        if !self.id.has_snapshot() {
            return Err(CustodyError::validation(format!(
                "snapshot record for {} has no snapshot id",
                self.id
            )));
        }
        if self.content_hash.is_empty() {
            return Err(CustodyError::validation("content_hash cannot be empty"));
        }
        Ok(())
    }

    /// Check if this record is compatible with the current format version
    pub fn is_compatible(&self) -> bool {
        self.format_version <= RECORD_FORMAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotId;

    fn snapshotted() -> EntityId {
        EntityId::new("k8sns", "uid-1")
            .with_snapshot(SnapshotId::new("s1"))
            .unwrap()
    }

    #[test]
    fn test_content_hash() {
        // SHA-256 of "test data" should be consistent
        assert_eq!(
            SnapshotRecord::compute_hash(b"test data"),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_with_content_matches_compute_hash() {
        let mut hasher = Sha256::new();
        hasher.update(b"test ");
        hasher.update(b"data");
        let record = SnapshotRecord::new(snapshotted(), "demo").with_content(hasher, 9);

        assert_eq!(record.size_bytes, 9);
        assert!(record.verify_integrity(b"test data").is_ok());
        assert!(record.verify_integrity(b"different data").is_err());
    }

    #[test]
    fn test_validation() {
        let record = SnapshotRecord::new(snapshotted(), "demo");
        // No content yet
        assert!(record.validate().is_err());

        let record = record.with_content(Sha256::new(), 0);
        assert!(record.validate().is_ok());

        let live = SnapshotRecord::new(EntityId::new("k8sns", "uid-1"), "demo")
            .with_content(Sha256::new(), 0);
        assert!(live.validate().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let record = SnapshotRecord::new(snapshotted(), "demo").with_content(Sha256::new(), 0);
        let json = serde_json::to_string(&record).unwrap();
        let back: SnapshotRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, record);
        assert!(back.is_compatible());
    }
}
