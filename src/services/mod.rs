//! Service layer: topology reads, refreshes and background upkeep.

pub mod topo_service;

pub use topo_service::TopoService;

#[cfg(test)]
mod tests;
