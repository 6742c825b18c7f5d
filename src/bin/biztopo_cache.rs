//! biztopo-cache: business topology cache service
//!
//! Keeps the brief and kube topology caches of every configured tenant
//! fresh: periodic sweeps and refresh queue workers per topology type, plus
//! one change stream watch per resource table.
//!
//! ## Architecture
//! ```text
//! [MongoDB change streams] -> [watchers] -> [node cache] -> [Redis]
//!                                  |                           ^
//!                                  v                           |
//!                          [refresh queues] -> [workers] ------+
//!                                                              |
//!                                  [periodic sweeps] ----------+
//! ```
//!
//! ## Configuration
//! - `--config <path>` or BIZTOPO_CONFIG: YAML configuration file
//! - BIZTOPO__*: configuration overrides (e.g. BIZTOPO__REDIS__URL)
//! - BIZTOPO_LOG: log filter (default: info)

use std::sync::Arc;

use tracing::{error, info};

use biztopo::config::Config;
use biztopo::services::TopoService;
use biztopo::storage;
use biztopo::topo::{KeyRegistry, TopologyManager};
use biztopo::utils::bootstrap::{init_tracing, parse_config_path};
use biztopo::utils::task::TaskHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(tenants = ?config.tenants, "Starting biztopo-cache");

    let backends = storage::connect(&config).await?;

    let keys = KeyRegistry::from_config(&config.topo, Arc::new(config.dynamic_config()));
    let manager = Arc::new(TopologyManager::new(
        backends.store.clone(),
        backends.cache.clone(),
        Arc::new(keys),
    ));
    let service = Arc::new(TopoService::new(
        manager,
        config.tenants.clone(),
        config.topo.queue.clone(),
    ));

    let mut tasks = TaskHandle::new();
    service.start(&mut tasks);
    service
        .watcher(backends.stream, backends.tokens, config.topo.watch.clone())?
        .start(&mut tasks);

    info!(tasks = tasks.len(), "biztopo-cache running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    tasks.shutdown().await;
    Ok(())
}
