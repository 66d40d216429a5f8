/*!
Backup engine: serializes the cluster objects of a request into an archive.
*/

use crate::action::BackupItemAction;
use crate::archive::ArchiveWriter;
use crate::cluster::ClusterClient;
use crate::{ClusterResource, CustodyError, EntityId, Result, SnapshotId};
use async_trait::async_trait;
use flate2::Compression;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWrite;
use tracing::{debug, info};

/// Component snapshots taken by actions during one backup run
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct ComponentLog(Arc<Mutex<Vec<EntityId>>>);

impl ComponentLog {
    pub fn record(&self, snapshotted: EntityId) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshotted);
    }

    /// Snapshotted identities in the order they were recorded
    pub fn entries(&self) -> Vec<EntityId> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// What a backup run should capture
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Backup name, unique per run
    pub name: String,
    /// Namespaces whose objects are archived
    pub included_namespaces: Vec<String>,
    /// Component snapshots taken while the run is in flight
    pub components: ComponentLog,
}

impl BackupRequest {
    /// Request capturing one namespace, named after the snapshot it produces
    pub fn for_namespace<S: Into<String>>(snapshot: &SnapshotId, namespace: S) -> Self {
        Self {
            name: snapshot.to_string(),
            included_namespaces: vec![namespace.into()],
            components: ComponentLog::default(),
        }
    }
}

/// Engine that turns a [`BackupRequest`] into an archive byte stream
#[async_trait]
pub trait BackupEngine: Send + Sync {
    /// Write the archive for `request` to `output`, running `actions` on each item
    ///
    /// `output` is neither shut down nor closed; the caller owns its lifecycle.
    async fn run_backup(
        &self,
        request: &BackupRequest,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        actions: &[Arc<dyn BackupItemAction>],
    ) -> Result<()>;
}

/// Engine writing gzip'd tar archives from a [`ClusterClient`]
pub struct ArchiveBackupEngine {
    cluster: Arc<dyn ClusterClient>,
    compression: Compression,
}

impl ArchiveBackupEngine {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            compression: Compression::default(),
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level);
        self
    }

    async fn apply_actions(
        item: ClusterResource,
        request: &BackupRequest,
        actions: &[Arc<dyn BackupItemAction>],
    ) -> Result<ClusterResource> {
        let mut item = item;
        for action in actions {
            if action.applies_to().matches(&item.resource) {
                item = action.execute(item, request).await?;
            }
        }
        Ok(item)
    }
}

#[async_trait]
impl BackupEngine for ArchiveBackupEngine {
    async fn run_backup(
        &self,
        request: &BackupRequest,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        actions: &[Arc<dyn BackupItemAction>],
    ) -> Result<()> {
        let namespaces = self.cluster.list_namespaces().await?;
        let mut writer = ArchiveWriter::new(output, self.compression);
        writer.write_version().await?;

        for namespace in &request.included_namespaces {
            let info = namespaces
                .iter()
                .find(|ns| &ns.name == namespace)
                .ok_or_else(|| CustodyError::not_found(format!("namespace {namespace}")))?;
            let item = Self::apply_actions(info.to_resource(), request, actions).await?;
            writer.write_item(&item).await?;

            let mut items = self.cluster.list_namespaced(namespace).await?;
            items.sort_by(|a, b| {
                a.resource
                    .cmp(&b.resource)
                    .then_with(|| a.name().ok().cmp(&b.name().ok()))
            });
            debug!(backup = %request.name, namespace = %namespace, items = items.len(), "archiving namespace");

            for item in items {
                let item = Self::apply_actions(item, request, actions).await?;
                writer.write_item(&item).await?;
            }
        }

        let items = writer.items_written();
        writer.finish().await?;
        info!(backup = %request.name, items, "backup archive written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ResourceSelector;
    use crate::archive;
    use crate::cluster::{MockClusterClient, NamespaceInfo, StaticCluster};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn shop_cluster() -> Arc<dyn ClusterClient> {
        Arc::new(StaticCluster::new().with_namespace(
            NamespaceInfo::new("shop", "uid-1"),
            vec![
                ClusterResource::new(
                    "postgresqls.acid.zalan.do",
                    json!({"metadata": {"name": "orders", "uid": "db-42"}}),
                ),
                ClusterResource::new(
                    "configmaps",
                    json!({"metadata": {"name": "settings", "uid": "cm-1"}}),
                ),
            ],
        ))
    }

    struct StampAction;

    #[async_trait]
    impl BackupItemAction for StampAction {
        fn applies_to(&self) -> ResourceSelector {
            ResourceSelector::resources(["configmaps"])
        }

        async fn execute(&self, mut item: ClusterResource, request: &BackupRequest) -> Result<ClusterResource> {
            let mut annotations = item.annotations()?;
            annotations.insert("stamped-by".to_string(), request.name.clone());
            item.set_annotations(&annotations)?;
            Ok(item)
        }
    }

    struct FailingAction;

    #[async_trait]
    impl BackupItemAction for FailingAction {
        fn applies_to(&self) -> ResourceSelector {
            ResourceSelector::all()
        }

        async fn execute(&self, _item: ClusterResource, _request: &BackupRequest) -> Result<ClusterResource> {
            Err(CustodyError::validation("refused"))
        }
    }

    #[tokio::test]
    async fn test_backup_archive_contents() {
        let engine = ArchiveBackupEngine::new(shop_cluster());
        let request = BackupRequest::for_namespace(&SnapshotId::new("s1"), "shop");
        let actions: Vec<Arc<dyn BackupItemAction>> = vec![Arc::new(StampAction)];

        let mut output = Vec::new();
        engine.run_backup(&request, &mut output, &actions).await.unwrap();

        let workspace = TempDir::new().unwrap();
        let dir = archive::extract(&output[..], workspace.path()).await.unwrap();
        let resources = archive::parse(&dir).unwrap();

        let kinds: Vec<_> = resources.keys().cloned().collect();
        assert_eq!(kinds, vec!["configmaps", "namespaces", "postgresqls.acid.zalan.do"]);
        assert_eq!(
            resources["namespaces"].items_by_namespace,
            BTreeMap::from([(String::new(), vec!["shop".to_string()])])
        );

        let settings = archive::read_item(&dir, "configmaps", "shop", "settings").unwrap();
        assert_eq!(settings.annotations().unwrap()["stamped-by"], "s1");
        let orders = archive::read_item(&dir, "postgresqls.acid.zalan.do", "shop", "orders").unwrap();
        assert!(orders.annotations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_failure_aborts_backup() {
        let engine = ArchiveBackupEngine::new(shop_cluster());
        let request = BackupRequest::for_namespace(&SnapshotId::new("s1"), "shop");
        let actions: Vec<Arc<dyn BackupItemAction>> = vec![Arc::new(FailingAction)];

        let mut output = Vec::new();
        let result = engine.run_backup(&request, &mut output, &actions).await;
        assert!(matches!(result, Err(CustodyError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let engine = ArchiveBackupEngine::new(shop_cluster());
        let request = BackupRequest::for_namespace(&SnapshotId::new("s1"), "nowhere");

        let mut output = Vec::new();
        let result = engine.run_backup(&request, &mut output, &[]).await;
        assert!(matches!(result, Err(CustodyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cluster_errors_propagate() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_namespaces()
            .returning(|| Err(CustodyError::cluster("connection refused")));
        let engine = ArchiveBackupEngine::new(Arc::new(cluster));
        let request = BackupRequest::for_namespace(&SnapshotId::new("s1"), "shop");

        let mut output = Vec::new();
        let result = engine.run_backup(&request, &mut output, &[]).await;
        assert!(matches!(result, Err(CustodyError::Cluster(_))));
        assert!(output.is_empty());
    }
}
