/*!
Access to the system of record that live entities are listed from.

[`ClusterClient`] is the narrow slice of a cluster API the type managers and
the backup engine need. [`StaticCluster`] serves a fixed inventory loaded from
a JSON fixture, which is what the CLI and the tests run against.
*/

use crate::{ClusterResource, CustodyError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// A namespace as listed from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub uid: String,
}

impl NamespaceInfo {
    pub fn new<N: Into<String>, U: Into<String>>(name: N, uid: U) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// The namespace as an archivable cluster object
    pub fn to_resource(&self) -> ClusterResource {
        ClusterResource::new(
            "namespaces",
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": self.name, "uid": self.uid}
            }),
        )
    }
}

/// Read-only view of the cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// All namespaces
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;

    /// Every namespaced object in `namespace`, across all resources
    async fn list_namespaced(&self, namespace: &str) -> Result<Vec<ClusterResource>>;

    /// Every object of one resource, across all namespaces
    async fn list_resources(&self, resource: &str) -> Result<Vec<ClusterResource>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FixtureNamespace {
    name: String,
    uid: String,
    #[serde(default)]
    resources: Vec<ClusterResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClusterFixture {
    #[serde(default)]
    namespaces: Vec<FixtureNamespace>,
}

/// Cluster backed by a fixed inventory
///
/// Fixture format:
/// ```json
/// {"namespaces": [
///   {"name": "shop", "uid": "uid-1", "resources": [
///     {"resource": "postgresqls.acid.zalan.do",
///      "object": {"metadata": {"name": "orders", "uid": "db-42"}}}
///   ]}
/// ]}
/// ```
/// Objects get their `metadata.namespace` filled in from the enclosing entry.
#[derive(Debug, Clone, Default)]
pub struct StaticCluster {
    fixture: ClusterFixture,
}

impl StaticCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            CustodyError::cluster(format!("failed to read fixture {}: {e}", path.display()))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let fixture: ClusterFixture = serde_json::from_slice(data)?;
        let mut cluster = Self::new();
        for namespace in fixture.namespaces {
            let info = NamespaceInfo::new(namespace.name, namespace.uid);
            cluster = cluster.with_namespace(info, namespace.resources);
        }
        Ok(cluster)
    }

    /// Add a namespace and its objects
    pub fn with_namespace(mut self, info: NamespaceInfo, resources: Vec<ClusterResource>) -> Self {
        let resources = resources
            .into_iter()
            .map(|mut item| {
                if let Some(metadata) = item.object.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata
                        .entry("namespace")
                        .or_insert_with(|| Value::String(info.name.clone()));
                }
                item
            })
            .collect();
        self.fixture.namespaces.push(FixtureNamespace {
            name: info.name,
            uid: info.uid,
            resources,
        });
        self
    }
}

#[async_trait]
impl ClusterClient for StaticCluster {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self
            .fixture
            .namespaces
            .iter()
            .map(|ns| NamespaceInfo::new(ns.name.clone(), ns.uid.clone()))
            .collect())
    }

    async fn list_namespaced(&self, namespace: &str) -> Result<Vec<ClusterResource>> {
        self.fixture
            .namespaces
            .iter()
            .find(|ns| ns.name == namespace)
            .map(|ns| ns.resources.clone())
            .ok_or_else(|| CustodyError::not_found(format!("namespace {namespace}")))
    }

    async fn list_resources(&self, resource: &str) -> Result<Vec<ClusterResource>> {
        Ok(self
            .fixture
            .namespaces
            .iter()
            .flat_map(|ns| ns.resources.iter())
            .filter(|item| item.resource == resource)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "namespaces": [
            {"name": "shop", "uid": "uid-1", "resources": [
                {"resource": "postgresqls.acid.zalan.do",
                 "object": {"metadata": {"name": "orders", "uid": "db-42"}}},
                {"resource": "configmaps",
                 "object": {"metadata": {"name": "settings", "uid": "cm-1"}}}
            ]},
            {"name": "empty", "uid": "uid-2"}
        ]
    }"#;

    #[tokio::test]
    async fn test_fixture_listing() {
        let cluster = StaticCluster::from_json(FIXTURE.as_bytes()).unwrap();

        let namespaces = cluster.list_namespaces().await.unwrap();
        assert_eq!(
            namespaces,
            vec![NamespaceInfo::new("shop", "uid-1"), NamespaceInfo::new("empty", "uid-2")]
        );

        let items = cluster.list_namespaced("shop").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].namespace(), Some("shop"));

        assert!(cluster.list_namespaced("empty").await.unwrap().is_empty());
        assert!(matches!(
            cluster.list_namespaced("missing").await,
            Err(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_resources_filters_by_resource() {
        let cluster = StaticCluster::from_json(FIXTURE.as_bytes()).unwrap();
        let databases = cluster.list_resources("postgresqls.acid.zalan.do").await.unwrap();
        assert_eq!(databases.len(), 1);
        assert_eq!(databases[0].uid().unwrap(), "db-42");
    }

    #[test]
    fn test_namespace_resource_form() {
        let item = NamespaceInfo::new("shop", "uid-1").to_resource();
        assert_eq!(item.resource, "namespaces");
        assert_eq!(item.uid().unwrap(), "uid-1");
        assert_eq!(item.namespace(), None);
    }

    #[test]
    fn test_invalid_fixture() {
        assert!(StaticCluster::from_json(b"{not json").is_err());
    }
}
