//! Business topology service.
//!
//! Serves topology reads and explicit refreshes, and owns the background
//! work that keeps the cache fresh:
//!
//! 1. A periodic full sweep per topology type over every business of every
//!    configured tenant
//! 2. A refresh queue worker per topology type
//! 3. Change stream watchers patching node caches and feeding the queues

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{QueueConfig, WatchConfig};
use crate::interfaces::{ChangeStream, TokenStore};
use crate::topo::{
    BizRef, GetBizTopoOption, RefreshBizTopoOption, RefreshQueues, RefreshWorker, Result,
    Scope, TopoType, TopologyManager,
};
use crate::utils::task::{StopSignal, TaskHandle};
use crate::watch::{
    BriefNodeHandler, BusinessHandler, KubeNodeHandler, PodHandler, ResourceKind,
    SharedNsRelations, Watcher,
};

/// Business topology service.
pub struct TopoService {
    manager: Arc<TopologyManager>,
    queues: Arc<RefreshQueues>,
    tenants: Vec<String>,
    queue_config: QueueConfig,
}

impl TopoService {
    /// Create a service with a refresh queue for every registered type.
    pub fn new(
        manager: Arc<TopologyManager>,
        tenants: Vec<String>,
        queue_config: QueueConfig,
    ) -> Self {
        let queues = Arc::new(RefreshQueues::new(&manager.types()));
        Self {
            manager,
            queues,
            tenants,
            queue_config,
        }
    }

    pub fn queues(&self) -> &Arc<RefreshQueues> {
        &self.queues
    }

    /// Serialized topology of a business.
    ///
    /// Served from the cached blob when there is one. A miss, an empty blob
    /// or a cache error computes the tree from the primary store instead;
    /// the result is written back in the background and returned whether or
    /// not that write succeeds.
    pub async fn get_biz_topo(
        &self,
        scope: &Scope,
        topo_type: TopoType,
        opt: &GetBizTopoOption,
    ) -> Result<String> {
        let key = self.manager.keys().get(topo_type)?;

        match self
            .manager
            .get_cached_biz_topo(scope, topo_type, opt.biz_id)
            .await
        {
            Ok(Some(blob)) if !blob.is_empty() => return Ok(blob),
            Ok(_) => {
                debug!(rid = %scope.rid, topo_type = %topo_type, biz_id = opt.biz_id,
                    "Topology not cached, generating");
            }
            Err(e) => {
                warn!(rid = %scope.rid, topo_type = %topo_type, biz_id = opt.biz_id, error = %e,
                    "Failed to read cached topology, generating");
            }
        }

        let json = self
            .manager
            .gen_biz_topo(scope, topo_type, opt.biz_id, false)
            .await?
            .to_json()?;

        let cache = self.manager.cache().clone();
        let blob_key = key.biz_topo_key(&scope.tenant, opt.biz_id);
        let value = json.clone();
        let rid = scope.rid.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.set(&blob_key, &value, key.ttl()).await {
                warn!(rid = %rid, key = %blob_key, error = %e, "Failed to cache generated topology");
            }
        });

        Ok(json)
    }

    /// Regenerate a business's topology from the primary store now.
    ///
    /// A pending queued refresh of the business becomes redundant and is
    /// dropped.
    pub async fn refresh_biz_topo(
        &self,
        scope: &Scope,
        topo_type: TopoType,
        opt: &RefreshBizTopoOption,
    ) -> Result<String> {
        let json = self
            .manager
            .refresh_biz_topo(scope, topo_type, opt.biz_id, false)
            .await?;
        if let Some(queue) = self.queues.get(topo_type) {
            queue.remove(&BizRef::new(scope.tenant.as_str(), opt.biz_id)).await;
        }
        info!(rid = %scope.rid, topo_type = %topo_type, biz_id = opt.biz_id,
            "Refreshed business topology");
        Ok(json)
    }

    /// Refresh every business of every tenant from the primary store.
    ///
    /// Returns the number of businesses refreshed. Failures are logged and
    /// skip only the business or tenant they occur in.
    pub async fn sweep(&self, topo_type: TopoType) -> usize {
        let queue = self.queues.get(topo_type);
        let mut refreshed = 0;

        for tenant in &self.tenants {
            let scope = Scope::generate(tenant.as_str());
            let biz_ids = match self.manager.list_biz_ids(tenant).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(rid = %scope.rid, tenant = %tenant, topo_type = %topo_type, error = %e,
                        "Failed to list businesses for sweep");
                    continue;
                }
            };

            for biz_id in biz_ids {
                // Changes arriving from here on queue the business again.
                if let Some(queue) = queue {
                    queue.remove(&BizRef::new(tenant.as_str(), biz_id)).await;
                }
                match self
                    .manager
                    .refresh_biz_topo(&scope, topo_type, biz_id, false)
                    .await
                {
                    Ok(_) => refreshed += 1,
                    Err(e) => {
                        warn!(rid = %scope.rid, tenant = %tenant, biz_id, topo_type = %topo_type,
                            error = %e, "Sweep failed to refresh business");
                    }
                }
            }
        }

        info!(topo_type = %topo_type, refreshed, "Topology sweep done");
        refreshed
    }

    /// Sweep every refresh interval until stopped. The interval is re-read
    /// before every wait so configuration changes apply without a restart.
    pub async fn run_sweeps(self: Arc<Self>, topo_type: TopoType, mut stop: StopSignal) {
        let key = match self.manager.keys().get(topo_type) {
            Ok(key) => key,
            Err(e) => {
                warn!(topo_type = %topo_type, error = %e, "Not sweeping unregistered topology type");
                return;
            }
        };

        info!(topo_type = %topo_type, "Topology sweeps started");
        loop {
            tokio::select! {
                _ = self.sweep(topo_type) => {}
                _ = stop.changed() => break,
            }

            let interval = key.refresh_interval();
            debug!(topo_type = %topo_type, interval = ?interval, "Next sweep scheduled");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => break,
            }
        }
        info!(topo_type = %topo_type, "Topology sweeps stopped");
    }

    /// A watcher feeding every registered topology type's caches and queues.
    pub fn watcher(
        &self,
        stream: Arc<dyn ChangeStream>,
        tokens: Arc<dyn TokenStore>,
        config: WatchConfig,
    ) -> Result<Watcher> {
        let mut watcher = Watcher::new(stream, tokens, config);
        watcher.register(
            ResourceKind::Business,
            Arc::new(BusinessHandler::new(self.manager.clone(), self.queues.clone())),
        );

        for topo_type in self.manager.types() {
            match topo_type {
                TopoType::Brief => {
                    for kind in [ResourceKind::Set, ResourceKind::Module] {
                        let handler =
                            BriefNodeHandler::new(kind, self.manager.clone(), self.queues.clone())?;
                        watcher.register(kind, Arc::new(handler));
                    }
                }
                TopoType::Kube => {
                    let shared = SharedNsRelations::new(self.manager.store().clone());
                    for kind in [
                        ResourceKind::Cluster,
                        ResourceKind::Namespace,
                        ResourceKind::Workload,
                    ] {
                        watcher.register(
                            kind,
                            Arc::new(KubeNodeHandler::new(
                                kind,
                                self.manager.clone(),
                                self.queues.clone(),
                                shared.clone(),
                            )),
                        );
                    }
                    watcher.register(
                        ResourceKind::Pod,
                        Arc::new(PodHandler::new(
                            self.manager.clone(),
                            self.queues.clone(),
                            shared,
                        )),
                    );
                }
            }
        }
        Ok(watcher)
    }

    /// Spawn the sweep loop and queue worker of every registered type.
    pub fn start(self: &Arc<Self>, tasks: &mut TaskHandle) {
        for topo_type in self.manager.types() {
            tasks.push(tokio::spawn(self.clone().run_sweeps(topo_type, tasks.signal())));

            if let Some(queue) = self.queues.get(topo_type) {
                let worker = RefreshWorker::new(
                    topo_type,
                    queue.clone(),
                    self.manager.clone(),
                    self.queue_config.max_retries,
                );
                tasks.push(tokio::spawn(worker.run(tasks.signal())));
            }
        }
        info!(tasks = tasks.len(), "Topology service started");
    }
}
