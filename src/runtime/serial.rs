//! Tokio-backed serial delivery context.
//!
//! All posted tasks are funneled through one unbounded queue drained by a
//! single driver task, so they execute one at a time in posting order.
//! Delayed tasks sleep on their own lightweight task and join the queue
//! when their delay elapses.

use super::context::{CancelHandle, DeliveryContext, Task};
use crate::base::neterror::NetError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Serial executor running on a tokio runtime.
#[derive(Clone)]
pub struct SerialExecutor {
    queue: mpsc::UnboundedSender<Task>,
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl SerialExecutor {
    /// Create an executor on the current tokio runtime.
    ///
    /// Fails with [`NetError::InvalidConfiguration`] when called outside a
    /// runtime, since no deadline could ever fire.
    pub fn new() -> Result<Self, NetError> {
        let runtime = Handle::try_current().map_err(|e| {
            NetError::InvalidConfiguration(format!("no tokio runtime for delivery context: {e}"))
        })?;
        Ok(Self::with_handle(runtime))
    }

    /// Create an executor on an explicit runtime.
    pub fn with_handle(runtime: Handle) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Task>();
        runtime.spawn(async move {
            while let Some(task) = rx.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!("delivery task panicked");
                }
            }
            tracing::trace!("delivery context drained");
        });
        Self { queue, runtime, next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Returns true once the driver task has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl DeliveryContext for SerialExecutor {
    fn post_now(&self, task: Task) {
        if self.queue.send(task).is_err() {
            tracing::warn!("delivery context closed; dropping task");
        }
    }

    fn post_after(&self, task: Task, delay: Duration) -> CancelHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = CancelHandle::new(id);
        let sleeper = handle.clone();
        let queue = self.queue.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = sleeper.cancelled() => {
                    tracing::trace!(id, "delayed task cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    let guarded = sleeper.clone();
                    // Cancellation may still land while the task waits in the queue.
                    let wrapped: Task = Box::new(move || {
                        if !guarded.is_cancelled() {
                            task();
                        }
                    });
                    if queue.send(wrapped).is_err() {
                        tracing::warn!(id, "delivery context closed; dropping delayed task");
                    }
                }
            }
        });
        handle
    }
}
