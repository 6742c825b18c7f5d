//! Abstract interfaces for the topology cache's collaborators.
//!
//! These traits define the contracts for:
//! - Key-value cache (node entries, index sets, top-level blobs)
//! - Document store (the source of truth for topology resources)
//! - Change streams (CDC events plus the deleted-document archive)
//! - Watch token persistence (resumable stream positions)

pub mod cache;
pub mod change_stream;
pub mod document_store;

pub use cache::{CacheError, CacheOp, KvCache};
pub use change_stream::{
    ChangeEvent, ChangeStream, EventCursor, OperationType, StreamError, TokenStore, WatchToken,
};
pub use document_store::{lookup, Document, DocumentStore, Filter, FindOptions, StoreError};
