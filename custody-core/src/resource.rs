/*!
Cluster resources as the backup engine and its actions see them.
*/

use crate::{CustodyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Annotation holding the snapshotted identity of the entity an item was
/// captured as; absent or unparseable values mean "no reference"
pub const COMPONENT_SNAPSHOT_ANNOTATION: &str = "custody.dev/component-snapshot";

/// One cluster object tagged with the resource it was listed from
///
/// `resource` is the plural group-resource name the object is served under
/// (`pods`, `postgresqls.acid.zalan.do`); `object` is the unstructured body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResource {
    pub resource: String,
    pub object: Value,
}

impl ClusterResource {
    pub fn new<S: Into<String>>(resource: S, object: Value) -> Self {
        Self {
            resource: resource.into(),
            object,
        }
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.object.get("metadata")?.get(field)?.as_str()
    }

    /// Cluster-assigned unique identifier
    pub fn uid(&self) -> Result<&str> {
        self.metadata_str("uid").ok_or_else(|| {
            CustodyError::validation(format!("{} item has no metadata.uid", self.resource))
        })
    }

    pub fn name(&self) -> Result<&str> {
        self.metadata_str("name").ok_or_else(|| {
            CustodyError::validation(format!("{} item has no metadata.name", self.resource))
        })
    }

    /// Namespace of a namespaced object, `None` for cluster-scoped ones
    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// Read `metadata.annotations`; a missing map reads as empty
    pub fn annotations(&self) -> Result<BTreeMap<String, String>> {
        read_annotations(&self.object)
    }

    /// Replace `metadata.annotations`
    pub fn set_annotations(&mut self, annotations: &BTreeMap<String, String>) -> Result<()> {
        write_annotations(&mut self.object, annotations)
    }
}

/// Read the string annotations of an unstructured object
pub fn read_annotations(object: &Value) -> Result<BTreeMap<String, String>> {
    let Some(metadata) = object.get("metadata") else {
        return Err(CustodyError::validation("object has no metadata"));
    };
    match metadata.get("annotations") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok((key.clone(), s.clone())),
                other => Err(CustodyError::validation(format!(
                    "annotation {key} is not a string: {other}"
                ))),
            })
            .collect(),
        Some(other) => Err(CustodyError::validation(format!(
            "metadata.annotations is not a map: {other}"
        ))),
    }
}

/// Overwrite the annotations of an unstructured object
pub fn write_annotations(object: &mut Value, annotations: &BTreeMap<String, String>) -> Result<()> {
    let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) else {
        return Err(CustodyError::validation("object has no metadata map"));
    };
    let map: Map<String, Value> = annotations
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    metadata.insert("annotations".to_string(), Value::Object(map));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn database() -> ClusterResource {
        ClusterResource::new(
            "postgresqls.acid.zalan.do",
            json!({
                "apiVersion": "acid.zalan.do/v1",
                "kind": "postgresql",
                "metadata": {"name": "orders", "namespace": "shop", "uid": "db-42"}
            }),
        )
    }

    #[test]
    fn test_metadata_accessors() {
        let item = database();
        assert_eq!(item.uid().unwrap(), "db-42");
        assert_eq!(item.name().unwrap(), "orders");
        assert_eq!(item.namespace(), Some("shop"));
    }

    #[test]
    fn test_missing_uid_is_an_error() {
        let item = ClusterResource::new("pods", json!({"metadata": {"name": "p"}}));
        assert!(item.uid().is_err());
        assert_eq!(item.namespace(), None);
    }

    #[test]
    fn test_annotations_absent_then_written() {
        let mut item = database();
        assert!(item.annotations().unwrap().is_empty());

        let mut annotations = item.annotations().unwrap();
        annotations.insert("team".to_string(), "payments".to_string());
        item.set_annotations(&annotations).unwrap();

        assert_eq!(item.object["metadata"]["annotations"]["team"], "payments");
        assert_eq!(item.annotations().unwrap(), annotations);
    }

    #[test]
    fn test_non_string_annotation_is_rejected() {
        let item = ClusterResource::new(
            "pods",
            json!({"metadata": {"annotations": {"count": 3}}}),
        );
        assert!(item.annotations().is_err());
    }

    #[test]
    fn test_write_without_metadata_fails() {
        let mut object = json!({"kind": "Thing"});
        assert!(write_annotations(&mut object, &BTreeMap::new()).is_err());
    }
}
