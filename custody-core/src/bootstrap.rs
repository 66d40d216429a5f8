/*!
Startup wiring of the protected-entity manager.
*/

use crate::cluster::ClusterClient;
use crate::config::CustodyConfig;
use crate::discovery::ComponentDiscoverer;
use crate::engine::ArchiveBackupEngine;
use crate::k8sns::{ComponentSnapshotAction, NamespaceTypeManager};
use crate::manager::ProtectedEntityManager;
use crate::pipeline::SnapshotPipeline;
use crate::repository::{create_repository_from_config, SnapshotRepository};
use crate::resource_entity::ResourceTypeManager;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Build the manager with the repository described by `config`
pub fn bootstrap(
    config: &CustodyConfig,
    cluster: Arc<dyn ClusterClient>,
) -> Result<Arc<ProtectedEntityManager>> {
    config.validate()?;
    let repository = create_repository_from_config(&config.repository)?;
    bootstrap_with_repository(config, cluster, repository)
}

/// Build the manager around an existing repository
///
/// Registers the `k8sns` type, one leaf type per entry of
/// `component_kinds`, and the component action on `k8sns`.
pub fn bootstrap_with_repository(
    config: &CustodyConfig,
    cluster: Arc<dyn ClusterClient>,
    repository: Arc<dyn SnapshotRepository>,
) -> Result<Arc<ProtectedEntityManager>> {
    let engine = ArchiveBackupEngine::new(Arc::clone(&cluster))
        .with_compression_level(config.compression_level);
    let pipeline = SnapshotPipeline::new(Arc::clone(&repository), Arc::new(engine))
        .with_pipe_capacity(config.pipe_capacity);
    let discoverer =
        ComponentDiscoverer::new(Arc::clone(&repository)).with_scratch_dir(config.scratch_dir.clone());
    let namespaces = NamespaceTypeManager::new(
        Arc::clone(&cluster),
        pipeline,
        discoverer,
        config.s3_url_base.clone(),
    );

    let mut manager = ProtectedEntityManager::new();
    manager.register(Arc::new(namespaces.clone()))?;
    for (kind, entity_type) in &config.component_kinds {
        manager.register(Arc::new(ResourceTypeManager::new(
            entity_type.as_str(),
            kind.as_str(),
            Arc::clone(&cluster),
            Arc::clone(&repository),
            config.s3_url_base.clone(),
        )))?;
    }

    let manager = Arc::new(manager);
    namespaces.set_actions(vec![Arc::new(ComponentSnapshotAction::new(
        manager.snapshotter(),
        config.component_kinds.clone(),
    ))])?;

    info!(types = ?manager.entity_types(), "protected entity manager ready");
    Ok(manager)
}
