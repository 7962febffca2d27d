//! Delivery context abstraction.
//!
//! A delivery context is a serial execution context onto which observers and
//! timer expiry handlers are posted. It plays the role of a UI-thread
//! message loop: tasks posted to it run one at a time, in posting order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A unit of work posted to a [`DeliveryContext`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial execution context used to deliver results and fire deadlines.
///
/// Implementations must be thread-safe; posting never blocks.
pub trait DeliveryContext: Send + Sync {
    /// Queue `task` to run as soon as possible.
    fn post_now(&self, task: Task);

    /// Queue `task` to run once `delay` has elapsed.
    fn post_after(&self, task: Task, delay: Duration) -> CancelHandle;

    /// Cancel a delayed task. No-op if it already ran or was cancelled.
    fn cancel(&self, handle: &CancelHandle) {
        handle.cancel();
    }
}

struct CancelState {
    cancelled: AtomicBool,
    wake: Notify,
}

/// Handle to a task queued with [`DeliveryContext::post_after`].
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(CancelState { cancelled: AtomicBool::new(false), wake: Notify::new() }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Mark cancelled and wake anything waiting in [`CancelHandle::cancelled`].
    /// Returns `false` if the handle was already cancelled.
    pub fn cancel(&self) -> bool {
        let first = !self.state.cancelled.swap(true, Ordering::AcqRel);
        if first {
            // notify_one stores a permit, so a waiter that has not polled yet still wakes
            self.state.wake.notify_one();
        }
        first
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.state.wake.notified().await;
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
