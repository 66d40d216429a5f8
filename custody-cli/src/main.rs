/*!
Custody CLI - Command-line interface for protected-entity snapshots.

This CLI wires a protected-entity manager over a cluster fixture and a
snapshot repository, and provides utilities for listing entities, taking
snapshots and inspecting their component graphs.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use custody_core::bootstrap::bootstrap_with_repository;
use custody_core::graph::walk_components;
use custody_core::observability::init_observability_with_filter;
use custody_core::{
    create_repository_from_config, CustodyConfig, CustodyError, EntityId,
    ProtectedEntityManager, RepositoryConfig, SnapshotRepository, StaticCluster,
};
use custody_retry::{local_repository_backoff_policy, snapshot_backoff_policy, with_backoff, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "custody")]
#[command(about = "CLI for Custody protected-entity snapshots")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cluster fixture (JSON inventory of namespaces and their objects)
    #[arg(long, global = true, env = "CUSTODY_CLUSTER")]
    cluster: Option<PathBuf>,

    /// Snapshot repository directory, overriding the configured repository
    #[arg(short, long, global = true)]
    snapshots_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List live protected entities of every registered type
    Entities,
    /// Snapshot a live entity
    Snapshot {
        /// Live entity identity, e.g. k8sns:<namespace uid>
        id: String,
        /// Attempts before giving up on transient failures
        #[arg(short, long, default_value_t = 1)]
        retries: usize,
    },
    /// List the snapshots of an entity
    Snapshots {
        /// Entity identity
        id: String,
    },
    /// List the components recorded in a snapshot
    Components {
        /// Snapshotted entity identity
        id: String,
        /// Follow components of components
        #[arg(short, long)]
        recursive: bool,
    },
    /// Show entity info as JSON
    Info {
        /// Entity identity
        id: String,
    },
    /// Verify the stored data of a snapshot against its recorded hash
    Verify {
        /// Snapshotted entity identity
        id: String,
    },
}

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    entity_type: String,
    #[tabled(rename = "Name")]
    name: String,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Snapshot")]
    id: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Depth")]
    depth: usize,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Component")]
    child: String,
}

struct App {
    manager: Arc<ProtectedEntityManager>,
    repository: Arc<dyn SnapshotRepository>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "custody=debug" } else { "custody=info" };
    init_observability_with_filter(cli.json_logs, default_filter)?;

    let app = build_context(&cli)?;

    // Execute command
    match cli.command {
        Commands::Entities => list_entities(&app).await?,
        Commands::Snapshot { id, retries } => take_snapshot(&app, &id, retries).await?,
        Commands::Snapshots { id } => list_snapshots(&app, &id).await?,
        Commands::Components { id, recursive } => list_components(&app, &id, recursive).await?,
        Commands::Info { id } => show_info(&app, &id).await?,
        Commands::Verify { id } => verify_snapshot(&app, &id).await?,
    }

    #[cfg(feature = "metrics")]
    if cli.verbose {
        if let Some(metrics) = custody_core::observability::CustodyMetrics::global() {
            eprintln!("{}", metrics.gather_metrics()?);
        }
    }

    Ok(())
}

fn build_context(cli: &Cli) -> Result<App, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => CustodyConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CustodyConfig::default(),
    };
    if let Some(dir) = &cli.snapshots_dir {
        config.repository = RepositoryConfig::local_at(dir);
    }
    config.validate()?;

    let cluster = match &cli.cluster {
        Some(path) => StaticCluster::from_file(path)
            .with_context(|| format!("loading cluster fixture {}", path.display()))?,
        None => {
            warn!("no cluster fixture given, the cluster is empty");
            StaticCluster::new()
        }
    };

    let repository = create_repository_from_config(&config.repository)?;
    let manager = bootstrap_with_repository(&config, Arc::new(cluster), Arc::clone(&repository))?;
    Ok(App { manager, repository })
}

fn parse_id(id: &str) -> Result<EntityId, anyhow::Error> {
    EntityId::parse(id).with_context(|| format!("invalid entity id '{id}'"))
}

async fn list_entities(app: &App) -> Result<(), anyhow::Error> {
    let mut rows = Vec::new();
    for entity_type in app.manager.entity_types() {
        let Some(type_manager) = app.manager.type_manager(entity_type) else {
            continue;
        };
        for id in type_manager.protected_entities().await? {
            let name = match type_manager.protected_entity(&id).await {
                Ok(entity) => entity.name().to_string(),
                Err(e) => {
                    warn!("Failed to resolve {}: {}", id, e);
                    "?".to_string()
                }
            };
            rows.push(EntityRow {
                id: id.to_string(),
                entity_type: entity_type.to_string(),
                name,
            });
        }
    }

    if rows.is_empty() {
        println!("No protected entities found");
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

async fn take_snapshot(app: &App, id: &str, retries: usize) -> Result<(), anyhow::Error> {
    let id = parse_id(id)?;
    info!("Snapshotting {}", id);

    let policy = RetryPolicy::new(snapshot_backoff_policy(), retries);
    let snapshot = with_backoff("snapshot", policy, |attempt| {
        let manager = Arc::clone(&app.manager);
        let id = id.clone();
        async move {
            if attempt > 1 {
                info!("Retrying snapshot of {} (attempt {})", id, attempt);
            }
            let entity = manager.get_protected_entity(&id).await?;
            entity.snapshot().await
        }
    })
    .await
    .map_err(|e| {
        error!("✗ Snapshot failed: {}", e);
        e
    })?;

    println!("✓ {}", id.with_snapshot(snapshot)?);
    Ok(())
}

async fn list_snapshots(app: &App, id: &str) -> Result<(), anyhow::Error> {
    let id = parse_id(id)?.without_snapshot();
    let entity = app.manager.get_protected_entity(&id).await?;

    let mut rows = Vec::new();
    for snapshot in entity.list_snapshots().await? {
        let snapshotted = id.with_snapshot(snapshot.clone())?;
        let row = match app.repository.metadata(&snapshotted).await {
            Ok(record) => SnapshotRow {
                id: snapshot.to_string(),
                created: record.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                size: format_size(record.size_bytes),
            },
            Err(e) => {
                warn!("Failed to load metadata for {}: {}", snapshotted, e);
                SnapshotRow {
                    id: snapshot.to_string(),
                    created: "Unknown".to_string(),
                    size: "Unknown".to_string(),
                }
            }
        };
        rows.push(row);
    }

    if rows.is_empty() {
        println!("No snapshots found for {id}");
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

async fn list_components(app: &App, id: &str, recursive: bool) -> Result<(), anyhow::Error> {
    let id = parse_id(id)?;
    if !id.has_snapshot() {
        warn!("{} is live; only snapshots record components", id);
    }

    let rows: Vec<ComponentRow> = if recursive {
        walk_components(&app.manager, &id)
            .await?
            .into_iter()
            .map(|edge| ComponentRow {
                depth: edge.depth,
                parent: edge.parent.to_string(),
                child: edge.child.to_string(),
            })
            .collect()
    } else {
        let entity = app.manager.get_protected_entity(&id).await?;
        entity
            .components()
            .await?
            .into_iter()
            .map(|child| ComponentRow {
                depth: 1,
                parent: id.to_string(),
                child: child.to_string(),
            })
            .collect()
    };

    if rows.is_empty() {
        println!("No components found");
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

async fn show_info(app: &App, id: &str) -> Result<(), anyhow::Error> {
    let id = parse_id(id)?;
    let info = app.manager.get_protected_entity(&id).await?.info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn verify_snapshot(app: &App, id: &str) -> Result<(), anyhow::Error> {
    let id = parse_id(id)?;
    info!("Verifying snapshot: {}", id);

    let policy = RetryPolicy::new(local_repository_backoff_policy(), 3);
    let (record, data) = with_backoff("verify", policy, |_| {
        let repository = Arc::clone(&app.repository);
        let id = id.clone();
        async move {
            let record = repository.metadata(&id).await?;
            let mut data = Vec::new();
            repository.read_stream(&id).await?.read_to_end(&mut data).await?;
            Ok::<_, CustodyError>((record, data))
        }
    })
    .await?;

    match record.verify_integrity(&data) {
        Ok(()) => {
            println!("✓ Snapshot is valid and integrity check passed");
            println!("  Name: {}", record.name);
            println!("  Size: {}", format_size(record.size_bytes));
            println!("  Content Hash: {}", record.content_hash);
            Ok(())
        }
        Err(e) => {
            error!("✗ Integrity check failed: {}", e);
            Err(anyhow::anyhow!("Integrity check failed"))
        }
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
