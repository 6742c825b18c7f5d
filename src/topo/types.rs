//! Topology data model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::TopoError;

/// A named variant of business topology rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopoType {
    /// Business → set → module, with idle sets split out.
    Brief,
    /// Business → cluster → namespace → workload, with container counts.
    Kube,
}

impl TopoType {
    pub const ALL: [TopoType; 2] = [TopoType::Brief, TopoType::Kube];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopoType::Brief => "brief",
            TopoType::Kube => "kube",
        }
    }
}

impl fmt::Display for TopoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopoType {
    type Err = TopoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brief" => Ok(TopoType::Brief),
            "kube" => Ok(TopoType::Kube),
            other => Err(TopoError::InvalidTopoType(other.to_string())),
        }
    }
}

/// One element of a topology tree.
///
/// `parent_id` only lives during assembly and is never serialized; `extra`
/// carries kind-specific side data (the brief tree's `default` flag).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: String,
    pub id: i64,
    #[serde(rename = "nm")]
    pub name: String,
    #[serde(skip)]
    pub parent_id: i64,
    #[serde(rename = "cnt", skip_serializing_if = "Option::is_none", default)]
    pub count: Option<i64>,
    #[serde(skip)]
    pub extra: Option<serde_json::Value>,
    #[serde(rename = "nds", skip_serializing_if = "Vec::is_empty", default)]
    pub sub_nodes: Vec<Node>,
}

impl Node {
    pub fn new(kind: impl Into<String>, id: i64, name: impl Into<String>, parent_id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
            name: name.into(),
            parent_id,
            ..Default::default()
        }
    }
}

/// Business identity at the root of a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizInfo {
    pub id: i64,
    #[serde(rename = "nm")]
    pub name: String,
    /// Resource-pool flag; `0` for normal businesses.
    #[serde(default)]
    pub default: i64,
}

/// Generic rendered topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizTopo {
    pub biz: BizInfo,
    #[serde(rename = "nds", default)]
    pub nodes: Vec<Node>,
}

/// Node of the brief topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BriefNode {
    #[serde(rename = "obj")]
    pub kind: String,
    pub id: i64,
    #[serde(rename = "nm")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default: Option<i64>,
    #[serde(rename = "nds", default)]
    pub sub_nodes: Vec<BriefNode>,
}

/// Brief topology: idle sets are separated from normal top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizBriefTopology {
    pub biz: BizInfo,
    pub idle: Vec<BriefNode>,
    #[serde(rename = "nds")]
    pub nodes: Vec<BriefNode>,
}

/// A rendered tree of any topology type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TopoTree {
    Generic(BizTopo),
    Brief(BizBriefTopology),
}

impl TopoTree {
    pub fn to_json(&self) -> Result<String, TopoError> {
        serde_json::to_string(self).map_err(|e| TopoError::Serialization(e.to_string()))
    }
}

/// Business reference inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BizRef {
    pub tenant: String,
    pub biz_id: i64,
}

impl BizRef {
    pub fn new(tenant: impl Into<String>, biz_id: i64) -> Self {
        Self {
            tenant: tenant.into(),
            biz_id,
        }
    }
}

impl fmt::Display for BizRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.biz_id)
    }
}

/// Options for reading a business topology.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetBizTopoOption {
    #[serde(rename = "bk_biz_id")]
    pub biz_id: i64,
}

/// Options for an explicit refresh of a business topology.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshBizTopoOption {
    #[serde(rename = "bk_biz_id")]
    pub biz_id: i64,
}

/// Per-request scope: tenant and request id for tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub tenant: String,
    pub rid: String,
}

impl Scope {
    pub fn new(tenant: impl Into<String>, rid: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            rid: rid.into(),
        }
    }

    /// Scope with a freshly generated request id.
    pub fn generate(tenant: impl Into<String>) -> Self {
        Self::new(tenant, uuid::Uuid::new_v4().simple().to_string())
    }
}
