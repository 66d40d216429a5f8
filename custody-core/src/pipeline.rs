/*!
Composite snapshot pipeline.

A snapshot runs the backup engine on a background task, writing into the
bounded [`pipe`](crate::pipe), while the calling task drains the other end
into the repository. The write end is always closed when the engine returns,
cleanly on success and with the engine's error otherwise, so the repository
never commits a truncated archive and never waits on a dead producer.
*/

use crate::action::ActionList;
use crate::engine::{BackupEngine, BackupRequest};
use crate::pipe::{pipe, PipeReader, PipeWriter, DEFAULT_CAPACITY};
use crate::repository::SnapshotRepository;
use crate::{CustodyError, EntityId, Result, SnapshotId};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[cfg(feature = "metrics")]
use crate::observability::MetricsTimer;

/// Drives a [`BackupEngine`] into a [`SnapshotRepository`]
#[derive(Clone)]
pub struct SnapshotPipeline {
    repository: Arc<dyn SnapshotRepository>,
    engine: Arc<dyn BackupEngine>,
    pipe_capacity: usize,
}

impl SnapshotPipeline {
    pub fn new(repository: Arc<dyn SnapshotRepository>, engine: Arc<dyn BackupEngine>) -> Self {
        Self {
            repository,
            engine,
            pipe_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Bound the conduit to `capacity` chunks in flight
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SnapshotRepository> {
        &self.repository
    }

    /// Snapshot the live entity `id` covering `namespace`
    ///
    /// Mints a fresh snapshot id, streams the engine's archive into the
    /// repository under `id` frozen at that snapshot, and returns the id once
    /// the repository has committed all data. On failure nothing stays listed:
    /// component snapshots taken by the actions during the run are deleted.
    ///
    /// # Errors
    /// * `AlreadySnapshotted` if `id` already names a snapshot
    /// * `ComponentSnapshotFailed` if an action failed to snapshot a component
    /// * `SnapshotFailed` wrapping any other engine or repository failure
    #[instrument(skip_all, fields(entity = %id))]
    pub async fn run(&self, id: &EntityId, namespace: &str, actions: ActionList) -> Result<SnapshotId> {
        if id.has_snapshot() {
            return Err(CustodyError::AlreadySnapshotted(id.to_string()));
        }

        let snapshot = SnapshotId::generate();
        let snapshotted = id.with_snapshot(snapshot.clone())?;
        let request = BackupRequest::for_namespace(&snapshot, namespace);
        let components = request.components.clone();

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start("snapshot");

        let (writer, reader) = pipe(self.pipe_capacity);
        let producer = self.spawn_engine(writer, request, actions);
        let written = self
            .repository
            .write_entity(Box::new(reader), &snapshotted, namespace)
            .await;
        let produced = match producer.await {
            Ok(result) => result,
            Err(e) => Err(CustodyError::storage(format!("backup task failed: {e}"))),
        };

        let cause = match (produced, written) {
            (Ok(()), Ok(record)) => {
                info!(snapshot = %snapshot, bytes = record.size_bytes, "snapshot committed");
                #[cfg(feature = "metrics")]
                timer.finish(record.size_bytes);
                return Ok(snapshot);
            }
            (Ok(()), Err(repository_err)) => repository_err,
            // A broken pipe only says the repository stopped reading first.
            (Err(engine_err), Err(repository_err)) if is_broken_pipe(&engine_err) => repository_err,
            (Err(engine_err), _) => engine_err,
        };

        error!(snapshot = %snapshot, error = %cause, "snapshot failed");
        self.discard_components(&components.entries()).await;
        #[cfg(feature = "metrics")]
        timer.finish_with_error();
        Err(CustodyError::snapshot_failed(id, cause))
    }

    /// Stream a fresh archive of `namespace` without storing it
    ///
    /// Engine errors surface as read errors on the returned reader.
    pub fn stream(&self, namespace: &str, actions: ActionList) -> PipeReader {
        let request = BackupRequest::for_namespace(&SnapshotId::generate(), namespace);
        let (writer, reader) = pipe(self.pipe_capacity);
        drop(self.spawn_engine(writer, request, actions));
        reader
    }

    fn spawn_engine(
        &self,
        mut writer: PipeWriter,
        request: BackupRequest,
        actions: ActionList,
    ) -> JoinHandle<Result<()>> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let result = engine.run_backup(&request, &mut writer, &actions).await;
            match result {
                Ok(()) => writer.shutdown().await.map_err(CustodyError::from),
                Err(e) => {
                    writer.close_with_error(io::Error::new(io::ErrorKind::Other, e.to_string()));
                    Err(e)
                }
            }
        })
    }

    async fn discard_components(&self, components: &[EntityId]) {
        for component in components {
            warn!(component = %component, "deleting component snapshot of failed parent");
            if let Err(e) = self.repository.delete_snapshot(component).await {
                error!(component = %component, error = %e, "failed to delete component snapshot");
            }
        }
    }
}

fn is_broken_pipe(err: &CustodyError) -> bool {
    matches!(err, CustodyError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
}
