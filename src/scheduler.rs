use log::warn;
use tokio::sync::{mpsc, oneshot};

use crate::error::RoutingError;

type Job = Box<dyn FnOnce() + Send>;

/// Single-writer task queue serializing every mutation to the route table
/// and discovery state, and orchestrating outbound sends. One consumer
/// loop is spawned at construction, fed by an mpsc channel, and runs for
/// the lifetime of the `Scheduler` handle, serializing submitted work the
/// way a spawn-and-serialize maintenance task does.
pub struct Scheduler {
    sender: mpsc::UnboundedSender<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
        });

        Self { sender }
    }

    /// Run `task` on the single consumer, and await its result. Callers
    /// compose an entire multi-row sequence (e.g. "delete request, delete
    /// broadcast statuses, insert route, insert usage") inside one closure
    /// so it is never interleaved with another task's mutations.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, RoutingError>
    where
        F: FnOnce() -> Result<T, RoutingError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            let result = task();
            if reply_tx.send(result).is_err() {
                warn!("scheduler: caller dropped reply channel before task completed");
            }
        });

        self.sender
            .send(job)
            .map_err(|_| RoutingError::storage("scheduler", "consumer task is no longer running"))?;

        reply_rx
            .await
            .map_err(|_| RoutingError::storage("scheduler", "consumer task dropped without replying"))?
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
