/*!
Snapshot archive format.

A composite snapshot is a gzip'd tar stream laid out as

```text
metadata/version
resources/<resource>/cluster/<name>.json                  cluster-scoped items
resources/<resource>/namespaces/<namespace>/<name>.json   namespaced items
```

Each item file holds one unstructured JSON object. [`ArchiveWriter`] produces
the stream incrementally, [`extract`] unpacks a stream into a directory and
[`parse`] groups the unpacked items by resource and namespace.
*/

use crate::{ClusterResource, CustodyError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Archive layout version written to `metadata/version`
pub const ARCHIVE_FORMAT_VERSION: &str = "1";

const RESOURCES_DIR: &str = "resources";
const CLUSTER_DIR: &str = "cluster";
const NAMESPACES_DIR: &str = "namespaces";
const ITEM_EXTENSION: &str = "json";

/// Items of one resource, keyed by namespace (`""` for cluster-scoped items)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceItems {
    pub resource: String,
    pub items_by_namespace: BTreeMap<String, Vec<String>>,
}

/// Parsed archive contents keyed by resource name
pub type BackupResources = BTreeMap<String, ResourceItems>;

/// Incremental writer of a snapshot archive
///
/// Tar framing and compression happen in memory one item at a time; the
/// compressed bytes are pushed to `output` after every item, so memory use
/// is bounded by the largest item rather than the whole archive.
pub struct ArchiveWriter<'a> {
    builder: tar::Builder<GzEncoder<Vec<u8>>>,
    output: &'a mut (dyn AsyncWrite + Send + Unpin),
    mtime: u64,
    items: usize,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(output: &'a mut (dyn AsyncWrite + Send + Unpin), level: Compression) -> Self {
        Self {
            builder: tar::Builder::new(GzEncoder::new(Vec::new(), level)),
            output,
            mtime: chrono::Utc::now().timestamp().max(0) as u64,
            items: 0,
        }
    }

    /// Write `metadata/version`
    pub async fn write_version(&mut self) -> Result<()> {
        self.append("metadata/version", ARCHIVE_FORMAT_VERSION.as_bytes())
            .await
    }

    /// Serialize one item at its canonical path
    pub async fn write_item(&mut self, item: &ClusterResource) -> Result<()> {
        let name = item.name()?;
        let path = item_relative_path(&item.resource, item.namespace().unwrap_or(""), name);
        let body = serde_json::to_vec_pretty(&item.object)?;
        self.append(&path.to_string_lossy(), &body).await?;
        self.items += 1;
        Ok(())
    }

    /// Number of items written so far
    pub fn items_written(&self) -> usize {
        self.items
    }

    async fn append(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.builder.append_data(&mut header, path, data)?;
        self.flush_pending().await
    }

    async fn flush_pending(&mut self) -> Result<()> {
        let pending = std::mem::take(self.builder.get_mut().get_mut());
        if !pending.is_empty() {
            self.output.write_all(&pending).await?;
        }
        Ok(())
    }

    /// Write the tar trailer and gzip footer
    pub async fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner()?;
        let tail = encoder.finish()?;
        self.output.write_all(&tail).await?;
        self.output.flush().await?;
        debug!(items = self.items, "archive finished");
        Ok(())
    }
}

/// Relative path of an item inside the archive
pub fn item_relative_path(resource: &str, namespace: &str, name: &str) -> PathBuf {
    let mut path = PathBuf::from(RESOURCES_DIR).join(resource);
    if namespace.is_empty() {
        path.push(CLUSTER_DIR);
    } else {
        path.push(NAMESPACES_DIR);
        path.push(namespace);
    }
    path.push(format!("{name}.{ITEM_EXTENSION}"));
    path
}

/// Absolute path of an item inside an extracted archive
pub fn item_file_path(dir: &Path, resource: &str, namespace: &str, name: &str) -> PathBuf {
    dir.join(item_relative_path(resource, namespace, name))
}

/// Unpack an archive stream into `workspace`
///
/// The stream is spooled to `workspace/archive.tar.gz` first and unpacked on
/// the blocking pool. Returns the directory the archive was unpacked into.
pub async fn extract<R>(mut reader: R, workspace: &Path) -> Result<PathBuf>
where
    R: AsyncRead + Send + Unpin,
{
    let spool = workspace.join("archive.tar.gz");
    let target = workspace.join("contents");

    let mut file = tokio::fs::File::create(&spool)
        .await
        .map_err(|e| CustodyError::ExtractionFailed(format!("create spool file: {e}")))?;
    let bytes = tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| CustodyError::ExtractionFailed(format!("read snapshot stream: {e}")))?;
    file.flush()
        .await
        .map_err(|e| CustodyError::ExtractionFailed(format!("flush spool file: {e}")))?;
    drop(file);
    debug!(bytes, spool = %spool.display(), "snapshot stream spooled");

    let unpack_target = target.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = fs::File::open(&spool)
            .map_err(|e| CustodyError::ExtractionFailed(format!("open spool file: {e}")))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(&unpack_target)
            .map_err(|e| CustodyError::ExtractionFailed(format!("unpack archive: {e}")))?;
        fs::remove_file(&spool)
            .map_err(|e| CustodyError::ExtractionFailed(format!("remove spool file: {e}")))
    })
    .await
    .map_err(|e| CustodyError::ExtractionFailed(format!("extraction task failed: {e}")))??;

    Ok(target)
}

/// Group the items of an extracted archive by resource and namespace
///
/// Resources, namespaces and item names come back sorted. A tree without a
/// `resources` directory is an archive with no items.
pub fn parse(dir: &Path) -> Result<BackupResources> {
    let mut resources = BackupResources::new();
    let root = dir.join(RESOURCES_DIR);
    if !root.exists() {
        return Ok(resources);
    }

    for resource in sorted_entries(&root, EntryKind::Dir)? {
        let resource_dir = root.join(&resource);
        let mut items = ResourceItems {
            resource: resource.clone(),
            items_by_namespace: BTreeMap::new(),
        };

        let cluster_dir = resource_dir.join(CLUSTER_DIR);
        if cluster_dir.is_dir() {
            items
                .items_by_namespace
                .insert(String::new(), item_names(&cluster_dir)?);
        }

        let namespaces_dir = resource_dir.join(NAMESPACES_DIR);
        if namespaces_dir.is_dir() {
            for namespace in sorted_entries(&namespaces_dir, EntryKind::Dir)? {
                let names = item_names(&namespaces_dir.join(&namespace))?;
                items.items_by_namespace.insert(namespace, names);
            }
        }

        resources.insert(resource, items);
    }

    Ok(resources)
}

/// Load one extracted item
pub fn read_item(dir: &Path, resource: &str, namespace: &str, name: &str) -> Result<ClusterResource> {
    let path = item_file_path(dir, resource, namespace, name);
    let data = fs::read(&path)?;
    let object = serde_json::from_slice(&data)?;
    Ok(ClusterResource::new(resource, object))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

fn sorted_entries(dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| CustodyError::ParseFailed(format!("read {}: {e}", dir.display())))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| CustodyError::ParseFailed(format!("read {}: {e}", dir.display())))?;
        let path = entry.path();
        let matches = match kind {
            EntryKind::Dir => path.is_dir(),
            EntryKind::File => path.is_file(),
        };
        if matches {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn item_names(dir: &Path) -> Result<Vec<String>> {
    let suffix = format!(".{ITEM_EXTENSION}");
    Ok(sorted_entries(dir, EntryKind::File)?
        .into_iter()
        .filter_map(|file| file.strip_suffix(&suffix).map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(resource: &str, namespace: Option<&str>, name: &str, uid: &str) -> ClusterResource {
        let mut metadata = json!({"name": name, "uid": uid});
        if let Some(ns) = namespace {
            metadata["namespace"] = json!(ns);
        }
        ClusterResource::new(resource, json!({"metadata": metadata}))
    }

    async fn build_archive(items: &[ClusterResource]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ArchiveWriter::new(&mut out, Compression::fast());
        writer.write_version().await.unwrap();
        for item in items {
            writer.write_item(item).await.unwrap();
        }
        assert_eq!(writer.items_written(), items.len());
        writer.finish().await.unwrap();
        out
    }

    #[test]
    fn test_item_paths() {
        assert_eq!(
            item_relative_path("pods", "shop", "web"),
            PathBuf::from("resources/pods/namespaces/shop/web.json")
        );
        assert_eq!(
            item_relative_path("namespaces", "", "shop"),
            PathBuf::from("resources/namespaces/cluster/shop.json")
        );
    }

    #[tokio::test]
    async fn test_write_extract_parse() {
        let archive = build_archive(&[
            item("namespaces", None, "shop", "uid-1"),
            item("pods", Some("shop"), "web-b", "p-2"),
            item("pods", Some("shop"), "web-a", "p-1"),
            item("configmaps", Some("shop"), "settings", "cm-1"),
        ])
        .await;

        let workspace = TempDir::new().unwrap();
        let dir = extract(archive.as_slice(), workspace.path()).await.unwrap();

        let version = fs::read_to_string(dir.join("metadata/version")).unwrap();
        assert_eq!(version, ARCHIVE_FORMAT_VERSION);

        let resources = parse(&dir).unwrap();
        let kinds: Vec<&String> = resources.keys().collect();
        assert_eq!(kinds, vec!["configmaps", "namespaces", "pods"]);
        assert_eq!(
            resources["pods"].items_by_namespace["shop"],
            vec!["web-a".to_string(), "web-b".to_string()]
        );
        assert_eq!(
            resources["namespaces"].items_by_namespace[""],
            vec!["shop".to_string()]
        );

        let pod = read_item(&dir, "pods", "shop", "web-a").unwrap();
        assert_eq!(pod.uid().unwrap(), "p-1");
        assert!(!workspace.path().join("archive.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_extract_rejects_garbage() {
        let workspace = TempDir::new().unwrap();
        let result = extract(&b"definitely not gzip"[..], workspace.path()).await;
        assert!(matches!(result, Err(CustodyError::ExtractionFailed(_))));
    }

    #[test]
    fn test_parse_without_resources_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(parse(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_item_without_name_is_rejected() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ArchiveWriter::new(&mut out, Compression::fast());
        let nameless = ClusterResource::new("pods", json!({"metadata": {"uid": "x"}}));
        assert!(writer.write_item(&nameless).await.is_err());
    }
}
