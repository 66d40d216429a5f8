/*!
Error types for the Custody core.
*/

use custody_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the Custody core.
pub type Result<T> = std::result::Result<T, CustodyError>;

/// Boxed cause carried by the wrapping snapshot errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during protected-entity operations.
#[derive(Error, Debug)]
pub enum CustodyError {
    /// I/O errors during file or stream operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entity identity string could not be parsed
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),

    /// The operation is only valid on a live (non-snapshotted) identity
    #[error("{0} is a snapshot and cannot be snapshotted again")]
    AlreadySnapshotted(String),

    /// No live entity or recorded snapshot matches the identity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or repository write failed while taking a snapshot
    #[error("Snapshot of {id} failed: {source}")]
    SnapshotFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    /// A nested component could not be snapshotted, invalidating the parent
    #[error("Snapshot of component {component} failed: {source}")]
    ComponentSnapshotFailed {
        component: String,
        #[source]
        source: BoxError,
    },

    /// A snapshot archive could not be extracted
    #[error("Archive extraction failed: {0}")]
    ExtractionFailed(String),

    /// An extracted archive tree could not be parsed
    #[error("Archive parse failed: {0}")]
    ParseFailed(String),

    /// Snapshot repository errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cluster client errors
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// No type manager is registered for the entity type
    #[error("Unknown protected entity type: {0}")]
    UnknownEntityType(String),

    /// A collaborator that was wired at startup is gone
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The operation is outside this subsystem
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CustodyError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new cluster error
    pub fn cluster<S: Into<String>>(msg: S) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new not-implemented error
    pub fn not_implemented<S: Into<String>>(operation: S) -> Self {
        Self::NotImplemented(operation.into())
    }

    /// Wrap a failure that happened while snapshotting `id`
    ///
    /// A component failure is already the most specific description of what
    /// went wrong and is passed through unchanged.
    pub fn snapshot_failed(id: impl ToString, cause: CustodyError) -> Self {
        match cause {
            err @ CustodyError::ComponentSnapshotFailed { .. } => err,
            other => Self::SnapshotFailed {
                id: id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap a failure of the nested snapshot of `component`
    pub fn component_failed(component: impl ToString, cause: CustodyError) -> Self {
        Self::ComponentSnapshotFailed {
            component: component.to_string(),
            source: Box::new(cause),
        }
    }
}

impl RetryableError for CustodyError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CustodyError::SnapshotFailed { .. }
                | CustodyError::Storage(_)
                | CustodyError::Io(_)
                | CustodyError::Cluster(_)
        )
    }
}
