//! Refresh queue: a deduplicating FIFO of businesses whose topology needs
//! regenerating, drained by one worker per topology type.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::topology::TopologyManager;
use super::types::{BizRef, Scope, TopoType};
use crate::utils::retry::is_retryable;
use crate::utils::task::StopSignal;

/// Worker sleep when the queue is empty.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(50);

/// Worker sleep after a failed refresh.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct QueueState<T> {
    order: VecDeque<T>,
    members: HashSet<T>,
    failures: HashMap<T, u32>,
}

/// Deduplicating FIFO.
///
/// An id already waiting is not added again and keeps its position.
pub struct RefreshQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for RefreshQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                members: HashSet::new(),
                failures: HashMap::new(),
            }),
        }
    }
}

impl<T> RefreshQueue<T>
where
    T: Clone + Eq + Hash + Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every id not already waiting.
    pub async fn push(&self, ids: impl IntoIterator<Item = T>) {
        let mut state = self.state.lock().await;
        for id in ids {
            if state.members.insert(id.clone()) {
                state.order.push_back(id);
            }
        }
    }

    /// Take the oldest id.
    pub async fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().await;
        let id = state.order.pop_front()?;
        state.members.remove(&id);
        Some(id)
    }

    /// Drop an id that was handled elsewhere, forgetting its failures.
    /// Returns whether it was waiting.
    pub async fn remove(&self, id: &T) -> bool {
        let mut state = self.state.lock().await;
        state.failures.remove(id);
        if !state.members.remove(id) {
            return false;
        }
        state.order.retain(|waiting| waiting != id);
        true
    }

    /// Count one more failed refresh of `id`, returning the total so far.
    pub async fn record_failure(&self, id: &T) -> u32 {
        let mut state = self.state.lock().await;
        let attempts = state.failures.entry(id.clone()).or_default();
        *attempts += 1;
        *attempts
    }

    /// Forget the failures counted for `id`.
    pub async fn clear_failures(&self, id: &T) {
        self.state.lock().await.failures.remove(id);
    }

    pub async fn failures(&self, id: &T) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn contains(&self, id: &T) -> bool {
        self.state.lock().await.members.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Refresh queues of every topology type.
#[derive(Default)]
pub struct RefreshQueues {
    queues: HashMap<TopoType, Arc<RefreshQueue<BizRef>>>,
}

impl RefreshQueues {
    pub fn new(types: &[TopoType]) -> Self {
        Self {
            queues: types
                .iter()
                .map(|t| (*t, Arc::new(RefreshQueue::new())))
                .collect(),
        }
    }

    pub fn get(&self, topo_type: TopoType) -> Option<&Arc<RefreshQueue<BizRef>>> {
        self.queues.get(&topo_type)
    }

    /// Enqueue businesses on one topology type's queue.
    pub async fn push(&self, topo_type: TopoType, ids: impl IntoIterator<Item = BizRef>) {
        if let Some(queue) = self.queues.get(&topo_type) {
            queue.push(ids).await;
        }
    }

    /// Enqueue businesses on every queue.
    pub async fn push_all(&self, ids: &[BizRef]) {
        for queue in self.queues.values() {
            queue.push(ids.iter().cloned()).await;
        }
    }

    /// Drop a business from every queue.
    pub async fn remove_all(&self, id: &BizRef) {
        for queue in self.queues.values() {
            queue.remove(id).await;
        }
    }
}

/// Drains one topology type's queue, refreshing from cache where possible.
///
/// Refreshes of one type are strictly serialized. A refresh that failed on a
/// transient error is put back at the end of the queue until it has failed
/// `max_retries` times. Failure counts live in the queue, so a business
/// removed from it starts over.
pub struct RefreshWorker {
    topo_type: TopoType,
    queue: Arc<RefreshQueue<BizRef>>,
    manager: Arc<TopologyManager>,
    max_retries: u32,
}

impl RefreshWorker {
    pub fn new(
        topo_type: TopoType,
        queue: Arc<RefreshQueue<BizRef>>,
        manager: Arc<TopologyManager>,
        max_retries: u32,
    ) -> Self {
        Self {
            topo_type,
            queue,
            manager,
            max_retries,
        }
    }

    /// Handle at most one queued business.
    ///
    /// Returns the delay the caller should wait before the next step.
    pub async fn step(&mut self) -> Option<Duration> {
        let Some(biz) = self.queue.pop().await else {
            return Some(IDLE_INTERVAL);
        };

        let scope = Scope::generate(biz.tenant.clone());
        match self
            .manager
            .refresh_biz_topo(&scope, self.topo_type, biz.biz_id, true)
            .await
        {
            Ok(_) => {
                debug!(rid = %scope.rid, topo_type = %self.topo_type, biz = %biz, "Refreshed queued business");
                self.queue.clear_failures(&biz).await;
                None
            }
            Err(e) if !is_retryable(&e) => {
                warn!(rid = %scope.rid, topo_type = %self.topo_type, biz = %biz, error = %e,
                    "Refresh failed permanently, dropping");
                self.queue.clear_failures(&biz).await;
                Some(ERROR_BACKOFF)
            }
            Err(e) => {
                let attempts = self.queue.record_failure(&biz).await;
                if attempts >= self.max_retries {
                    error!(rid = %scope.rid, topo_type = %self.topo_type, biz = %biz,
                        attempts, error = %e, "Refresh failed, giving up");
                    self.queue.clear_failures(&biz).await;
                } else {
                    warn!(rid = %scope.rid, topo_type = %self.topo_type, biz = %biz,
                        attempts, error = %e, "Refresh failed, requeueing");
                    self.queue.push([biz]).await;
                }
                Some(ERROR_BACKOFF)
            }
        }
    }

    /// Drain the queue until stopped.
    pub async fn run(mut self, mut stop: StopSignal) {
        info!(topo_type = %self.topo_type, "Refresh worker started");
        loop {
            let Some(delay) = self.step().await else {
                if stop.has_changed().unwrap_or(true) {
                    break;
                }
                continue;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }
        info!(topo_type = %self.topo_type, "Refresh worker stopped");
    }
}
