//! Change data capture for the topology cache.
//!
//! One [`Watcher`] task per watched table consumes the change stream, keeps
//! a resumable token, and hands event batches to the [`EventHandler`]
//! registered for the table's [`ResourceKind`]. Handlers patch the node
//! cache directly and enqueue the affected businesses for a blob refresh.

use std::fmt;

use async_trait::async_trait;

use crate::interfaces::ChangeEvent;
use crate::topo::schema::{
    workload_kind, TABLE_BIZ, TABLE_CLUSTER, TABLE_MODULE, TABLE_NAMESPACE, TABLE_POD,
    TABLE_SET, WORKLOAD_TABLES,
};
use crate::topo::Result;

mod brief;
mod business;
mod kube;
mod task;


pub use brief::BriefNodeHandler;
pub use business::BusinessHandler;
pub use kube::{KubeNodeHandler, PodHandler, SharedNsRelations};
pub use task::{token_name, Watcher};

/// Resource whose changes affect a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Business,
    Set,
    Module,
    Cluster,
    Namespace,
    /// Any of the workload kinds; each lives in its own table.
    Workload,
    Pod,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Business,
        ResourceKind::Set,
        ResourceKind::Module,
        ResourceKind::Cluster,
        ResourceKind::Namespace,
        ResourceKind::Workload,
        ResourceKind::Pod,
    ];

    /// Tables holding resources of this kind.
    pub fn tables(&self) -> Vec<&'static str> {
        match self {
            ResourceKind::Business => vec![TABLE_BIZ],
            ResourceKind::Set => vec![TABLE_SET],
            ResourceKind::Module => vec![TABLE_MODULE],
            ResourceKind::Cluster => vec![TABLE_CLUSTER],
            ResourceKind::Namespace => vec![TABLE_NAMESPACE],
            ResourceKind::Workload => WORKLOAD_TABLES.iter().map(|(_, table)| *table).collect(),
            ResourceKind::Pod => vec![TABLE_POD],
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            TABLE_BIZ => Some(ResourceKind::Business),
            TABLE_SET => Some(ResourceKind::Set),
            TABLE_MODULE => Some(ResourceKind::Module),
            TABLE_CLUSTER => Some(ResourceKind::Cluster),
            TABLE_NAMESPACE => Some(ResourceKind::Namespace),
            TABLE_POD => Some(ResourceKind::Pod),
            other => workload_kind(other).map(|_| ResourceKind::Workload),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Business => "business",
            ResourceKind::Set => "set",
            ResourceKind::Module => "module",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Workload => "workload",
            ResourceKind::Pod => "pod",
        };
        f.write_str(name)
    }
}

/// Applies a batch of change events of one table.
///
/// Delete events arrive with their archived document already filled in when
/// one was found. An error fails the whole batch, which is then retried, so
/// handlers must be safe to run twice over the same events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, events: &[ChangeEvent]) -> Result<()>;
}
