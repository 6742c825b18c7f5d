//! biztopo - business topology cache
//!
//! Keeps denormalized business topology trees (sets and modules, or
//! clusters, namespaces and workloads) in a key-value cache, patched from the
//! primary store's change streams and refreshed through a deduplicating
//! queue and periodic sweeps.

pub mod config;
pub mod interfaces;
pub mod services;
pub mod storage;
pub mod topo;
pub mod utils;
pub mod watch;
