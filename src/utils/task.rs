//! Background task lifetime.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Stop signal shared by background loops.
///
/// Loops select on `changed()`; any change, or the handle being dropped,
/// means stop.
pub type StopSignal = watch::Receiver<bool>;

/// Owns a group of background tasks and their stop signal.
pub struct TaskHandle {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandle {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    /// A stop signal for a new task.
    pub fn signal(&self) -> StopSignal {
        self.cancel.subscribe()
    }

    /// Track a spawned task.
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        self.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}
