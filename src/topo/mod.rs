//! Business topology cache.
//!
//! Derives denormalized business trees from the primary store, caches them
//! per node and as whole-tree blobs, and keeps both fresh through a
//! deduplicating refresh queue.
//!
//! ## Components
//!
//! - [`key`]: cache naming, TTL and refresh interval per topology type
//! - [`node`]: per-node cache entries and reconciliation
//! - [`level`]: composable topology layers (DB and cache fetch paths)
//! - [`tree`]: exported tree shapes
//! - [`topology`]: orchestration and blob maintenance
//! - [`queue`]: refresh queue and worker

mod error;
pub mod key;
pub mod level;
pub mod node;
pub mod queue;
pub mod schema;
pub mod topology;
pub mod tree;
mod types;

pub use error::{Result, TopoError};
pub use key::{Key, KeyRegistry};
pub use node::NodeCache;
pub use queue::{RefreshQueue, RefreshQueues, RefreshWorker};
pub use topology::TopologyManager;
pub use tree::{BriefTree, GenericTree, Tree};
pub use types::{
    BizBriefTopology, BizInfo, BizRef, BizTopo, BriefNode, GetBizTopoOption, Node,
    RefreshBizTopoOption, Scope, TopoTree, TopoType,
};
