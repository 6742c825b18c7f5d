//! Primary store tables and fields read by topology levels and watchers.
//!
//! Also holds the document accessors shared by every node parser.

use serde_json::Value;

use super::error::{Result, TopoError};
use crate::interfaces::{lookup, Document};

pub const TABLE_BIZ: &str = "cc_ApplicationBase";
pub const TABLE_SET: &str = "cc_SetBase";
pub const TABLE_MODULE: &str = "cc_ModuleBase";

pub const TABLE_CLUSTER: &str = "cc_KubeCluster";
pub const TABLE_NAMESPACE: &str = "cc_KubeNamespace";
pub const TABLE_NS_SHARED_RELATION: &str = "cc_NsSharedClusterRelation";
pub const TABLE_POD: &str = "cc_KubePod";
pub const TABLE_CONTAINER: &str = "cc_KubeContainer";

pub const FIELD_BIZ_ID: &str = "bk_biz_id";
pub const FIELD_BIZ_NAME: &str = "bk_biz_name";
pub const FIELD_DEFAULT: &str = "default";
pub const FIELD_SET_ID: &str = "bk_set_id";
pub const FIELD_SET_NAME: &str = "bk_set_name";
pub const FIELD_MODULE_ID: &str = "bk_module_id";
pub const FIELD_MODULE_NAME: &str = "bk_module_name";

pub const FIELD_ID: &str = "id";
pub const FIELD_NAME: &str = "name";
pub const FIELD_CLUSTER_ID: &str = "bk_cluster_id";
pub const FIELD_NAMESPACE_ID: &str = "bk_namespace_id";
pub const FIELD_ASST_BIZ_ID: &str = "bk_asst_biz_id";
pub const FIELD_REF_KIND: &str = "ref.kind";
pub const FIELD_REF_ID: &str = "ref.id";
pub const FIELD_POD_ID: &str = "bk_pod_id";

pub const KIND_SET: &str = "set";
pub const KIND_MODULE: &str = "module";
pub const KIND_CLUSTER: &str = "cluster";
pub const KIND_NAMESPACE: &str = "namespace";

/// Workload kinds and their tables, in tree order.
pub const WORKLOAD_TABLES: [(&str, &str); 8] = [
    ("deployment", "cc_KubeDeployment"),
    ("statefulSet", "cc_KubeStatefulSet"),
    ("daemonSet", "cc_KubeDaemonSet"),
    ("gameStatefulSet", "cc_KubeGameStatefulSet"),
    ("gameDeployment", "cc_KubeGameDeployment"),
    ("cronJob", "cc_KubeCronJob"),
    ("job", "cc_KubeJob"),
    ("pods", "cc_KubePodWorkload"),
];

/// Workload kind stored in a table, if it is a workload table.
pub fn workload_kind(table: &str) -> Option<&'static str> {
    WORKLOAD_TABLES
        .iter()
        .find(|(_, t)| *t == table)
        .map(|(kind, _)| *kind)
}

/// Workload table of a kind.
pub fn workload_table(kind: &str) -> Option<&'static str> {
    WORKLOAD_TABLES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, table)| *table)
}

/// Integer field of a node document; missing or non-integer is an error.
pub fn doc_i64(doc: &Document, field: &str, kind: &str) -> Result<i64> {
    let value = lookup(doc, field).ok_or_else(|| TopoError::InvalidNode {
        kind: kind.to_string(),
        id: doc_id_hint(doc),
        reason: format!("missing field {}", field),
    })?;
    as_i64(value).ok_or_else(|| TopoError::InvalidNode {
        kind: kind.to_string(),
        id: doc_id_hint(doc),
        reason: format!("field {} is not an integer: {}", field, value),
    })
}

/// String field of a node document; a missing name renders as empty.
pub fn doc_str(doc: &Document, field: &str) -> String {
    lookup(doc, field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Integer value, accepting integral floats.
pub fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn doc_id_hint(doc: &Document) -> i64 {
    [FIELD_ID, FIELD_SET_ID, FIELD_MODULE_ID, FIELD_BIZ_ID]
        .iter()
        .find_map(|f| doc.get(*f).and_then(as_i64))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[test]
    fn test_workload_table_mapping() {
        assert_eq!(workload_kind("cc_KubeDeployment"), Some("deployment"));
        assert_eq!(workload_table("pods"), Some("cc_KubePodWorkload"));
        assert_eq!(workload_kind("cc_KubeNamespace"), None);
    }

    #[test]
    fn test_doc_i64_accepts_integral_numbers() {
        let d = doc(json!({"id": 3, "f": 4.0, "ref": {"id": 9}}));
        assert_eq!(doc_i64(&d, "id", "x").unwrap(), 3);
        assert_eq!(doc_i64(&d, "f", "x").unwrap(), 4);
        assert_eq!(doc_i64(&d, "ref.id", "x").unwrap(), 9);
    }

    #[test]
    fn test_doc_i64_rejects_bad_shapes() {
        let d = doc(json!({"id": 3, "default": "1", "ratio": 1.5}));
        assert!(matches!(
            doc_i64(&d, "default", "set"),
            Err(TopoError::InvalidNode { id: 3, .. })
        ));
        assert!(doc_i64(&d, "ratio", "set").is_err());
        assert!(doc_i64(&d, "missing", "set").is_err());
    }
}
