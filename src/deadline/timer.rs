//! Fire-once deadline alarms on a delivery context.

use crate::runtime::context::{CancelHandle, DeliveryContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle to an armed deadline.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancel: CancelHandle,
    fired: Arc<AtomicBool>,
    duration: Duration,
}

impl TimerHandle {
    /// True once the expiry handler has started running.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// True while the alarm can still fire.
    pub fn is_armed(&self) -> bool {
        !self.has_fired() && !self.cancel.is_cancelled()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Schedules deadline expiry handlers on a [`DeliveryContext`].
#[derive(Clone)]
pub struct DeadlineTimer {
    context: Arc<dyn DeliveryContext>,
}

impl DeadlineTimer {
    pub fn new(context: Arc<dyn DeliveryContext>) -> Self {
        Self { context }
    }

    /// Run `on_expire` on the delivery context once `duration` elapses.
    pub fn arm<F>(&self, duration: Duration, on_expire: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cancel = self.context.post_after(
            Box::new(move || {
                flag.store(true, Ordering::Release);
                on_expire();
            }),
            duration,
        );
        let duration_ms = duration.as_millis() as u64;
        tracing::trace!(id = cancel.id(), duration_ms, "deadline armed");
        TimerHandle { cancel, fired, duration }
    }

    /// Cancel a pending alarm. Safe to call after it fired, or twice.
    pub fn disarm(&self, handle: &TimerHandle) {
        if handle.is_armed() {
            tracing::trace!(id = handle.cancel.id(), "deadline disarmed");
        }
        self.context.cancel(&handle.cancel);
    }
}
