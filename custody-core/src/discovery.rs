/*!
Component-graph discovery.

The components of a composite snapshot are not stored anywhere on their own.
They are recovered by unpacking the snapshot archive into a scratch workspace
and reading the component annotation off every archived item.
*/

use crate::archive;
use crate::repository::SnapshotRepository;
use crate::resource::COMPONENT_SNAPSHOT_ANNOTATION;
use crate::{CustodyError, EntityId, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

const WORKSPACE_PREFIX: &str = "custody-extract-";

/// Recovers the component identities recorded in a composite snapshot
#[derive(Clone)]
pub struct ComponentDiscoverer {
    repository: Arc<dyn SnapshotRepository>,
    scratch_dir: Option<PathBuf>,
}

impl ComponentDiscoverer {
    pub fn new(repository: Arc<dyn SnapshotRepository>) -> Self {
        Self {
            repository,
            scratch_dir: None,
        }
    }

    /// Create workspaces under `dir` instead of the system temp directory
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Component identities recorded in the snapshot `id`
    ///
    /// A live identity has no recorded components and yields an empty list.
    /// Items without the annotation, with an unparseable value, or with a
    /// value that names no snapshot are skipped. The result is ordered by
    /// resource, then namespace, then item name.
    ///
    /// The scratch workspace is removed before this returns, whatever the
    /// outcome.
    #[instrument(skip(self), fields(entity = %id))]
    pub async fn discover(&self, id: &EntityId) -> Result<Vec<EntityId>> {
        if !id.has_snapshot() {
            return Ok(Vec::new());
        }

        let reader = self.repository.read_stream(id).await?;
        let workspace = self.workspace()?;
        let dir = archive::extract(reader, workspace.path()).await?;

        let components = tokio::task::spawn_blocking(move || scan_components(&dir))
            .await
            .map_err(|e| CustodyError::ParseFailed(format!("scan task failed: {e}")))??;

        debug!(components = components.len(), "components discovered");
        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::CustodyMetrics::global() {
            metrics.record_components_discovered(components.len());
        }
        Ok(components)
    }

    fn workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let workspace = match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        };
        workspace.map_err(|e| CustodyError::ExtractionFailed(format!("create workspace: {e}")))
    }
}

/// Collect component references from an extracted archive tree
fn scan_components(dir: &Path) -> Result<Vec<EntityId>> {
    let resources = archive::parse(dir)?;
    let mut components = Vec::new();

    for (resource, items) in &resources {
        for (namespace, names) in &items.items_by_namespace {
            for name in names {
                let item = match archive::read_item(dir, resource, namespace, name) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(resource = %resource, namespace = %namespace, item = %name, error = %e, "skipping unreadable item");
                        continue;
                    }
                };
                let Ok(annotations) = item.annotations() else {
                    continue;
                };
                let Some(reference) = annotations.get(COMPONENT_SNAPSHOT_ANNOTATION) else {
                    continue;
                };
                match EntityId::parse(reference) {
                    Ok(component) if component.has_snapshot() => components.push(component),
                    Ok(_) => {
                        warn!(item = %name, reference = %reference, "component reference names no snapshot")
                    }
                    Err(e) => {
                        warn!(item = %name, reference = %reference, error = %e, "malformed component reference")
                    }
                }
            }
        }
    }

    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::repository::MemorySnapshotRepository;
    use crate::{ClusterResource, SnapshotId};
    use flate2::Compression;
    use serde_json::json;

    fn item(resource: &str, name: &str, reference: Option<&str>) -> ClusterResource {
        let mut object = json!({"metadata": {"name": name, "namespace": "shop", "uid": format!("{name}-uid")}});
        if let Some(reference) = reference {
            object["metadata"]["annotations"] = json!({ COMPONENT_SNAPSHOT_ANNOTATION: reference });
        }
        ClusterResource::new(resource, object)
    }

    async fn archive_of(items: &[ClusterResource]) -> Vec<u8> {
        let mut output = Vec::new();
        let mut writer = ArchiveWriter::new(&mut output, Compression::fast());
        writer.write_version().await.unwrap();
        for item in items {
            writer.write_item(item).await.unwrap();
        }
        writer.finish().await.unwrap();
        output
    }

    async fn store(repository: &MemorySnapshotRepository, data: Vec<u8>) -> EntityId {
        let id = EntityId::new("k8sns", "uid-1")
            .with_snapshot(SnapshotId::generate())
            .unwrap();
        repository
            .write_entity(Box::new(std::io::Cursor::new(data)), &id, "shop")
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_discovery_skips_noise_and_orders_results() {
        let repository = MemorySnapshotRepository::new();
        let data = archive_of(&[
            item("postgresqls.acid.zalan.do", "orders", Some("psql:db-42:s9")),
            item("postgresqls.acid.zalan.do", "archive", Some("psql:db-7:s3")),
            item("configmaps", "settings", Some("psql:db-1:s1")),
            item("configmaps", "garbage", Some("not an id")),
            item("configmaps", "live-ref", Some("psql:db-2")),
            item("secrets", "plain", None),
        ])
        .await;
        let id = store(&repository, data).await;

        let scratch = TempDir::new().unwrap();
        let discoverer = ComponentDiscoverer::new(Arc::new(repository))
            .with_scratch_dir(Some(scratch.path().to_path_buf()));
        let components = discoverer.discover(&id).await.unwrap();

        let rendered: Vec<String> = components.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["psql:db-1:s1", "psql:db-7:s3", "psql:db-42:s9"]);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_live_identity_has_no_components() {
        let discoverer = ComponentDiscoverer::new(Arc::new(MemorySnapshotRepository::new()));
        let components = discoverer.discover(&EntityId::new("k8sns", "uid-1")).await.unwrap();
        assert!(components.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails_and_cleans_up() {
        let repository = MemorySnapshotRepository::new();
        let id = store(&repository, b"definitely not gzip".to_vec()).await;

        let scratch = TempDir::new().unwrap();
        let discoverer = ComponentDiscoverer::new(Arc::new(repository))
            .with_scratch_dir(Some(scratch.path().to_path_buf()));
        let result = discoverer.discover(&id).await;

        assert!(matches!(result, Err(CustodyError::ExtractionFailed(_))));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_not_found() {
        let discoverer = ComponentDiscoverer::new(Arc::new(MemorySnapshotRepository::new()));
        let id = EntityId::new("k8sns", "uid-1")
            .with_snapshot(SnapshotId::new("missing"))
            .unwrap();
        assert!(matches!(discoverer.discover(&id).await, Err(CustodyError::NotFound(_))));
    }
}
