/*!
Backup item actions: hooks the engine runs on every archived item.
*/

use crate::engine::BackupRequest;
use crate::{ClusterResource, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Which items an action wants to see
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSelector {
    /// Resource names to include; empty means every resource
    pub included_resources: Vec<String>,
}

impl ResourceSelector {
    /// Select every item
    pub fn all() -> Self {
        Self::default()
    }

    pub fn resources<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            included_resources: resources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, resource: &str) -> bool {
        self.included_resources.is_empty() || self.included_resources.iter().any(|r| r == resource)
    }
}

/// Hook invoked on each item before it is written to the archive
///
/// The returned item is what gets archived. An error aborts the whole backup.
#[async_trait]
pub trait BackupItemAction: Send + Sync {
    fn applies_to(&self) -> ResourceSelector;

    async fn execute(&self, item: ClusterResource, request: &BackupRequest) -> Result<ClusterResource>;
}

/// Shared, immutable list of registered actions
pub type ActionList = Arc<Vec<Arc<dyn BackupItemAction>>>;
