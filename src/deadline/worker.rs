//! Cancellable worker.
//!
//! Runs one possibly-indefinite operation on its own tokio task. `abort()`
//! does two things, because either alone can leave the worker stuck:
//!
//! 1. closes the resource the operation published (if any), so a read or
//!    write parked on it fails promptly;
//! 2. latches an abort signal that the worker task races against the
//!    operation, which drops the operation future even when it is still
//!    inside DNS or the TCP handshake with nothing to close yet.
//!
//! The latch is a `watch` value, so a worker that has not been polled yet
//! still observes an abort that happened before it started.

use super::channel::Outcome;
use crate::base::neterror::NetError;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Closer<C> = Box<dyn Fn(&C) + Send + Sync + 'static>;

struct SlotState<C> {
    aborted: Option<NetError>,
    resource: Option<Weak<C>>,
}

struct Shared<C> {
    // Guards both the abort flag and the published resource, so abort never
    // misses a resource that is being published concurrently.
    slot: Mutex<SlotState<C>>,
    abort_tx: watch::Sender<bool>,
    closer: Closer<C>,
}

impl<C> Shared<C> {
    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<C>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handed to the running operation so it can publish the resource it opened.
pub struct ResourceSlot<C> {
    shared: Arc<Shared<C>>,
}

impl<C> ResourceSlot<C> {
    /// Publish `resource` as the thing `abort()` must close.
    ///
    /// Returns the abort reason if the worker was aborted first; the
    /// resource has then already been closed and the operation should bail.
    pub fn publish(&self, resource: &Arc<C>) -> Result<(), NetError> {
        let mut slot = self.shared.lock();
        if let Some(reason) = slot.aborted.clone() {
            drop(slot);
            (self.shared.closer)(resource);
            return Err(reason);
        }
        slot.resource = Some(Arc::downgrade(resource));
        Ok(())
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.lock().aborted.is_some()
    }
}

/// Resolves once the abort latch is set. Never resolves if the sender is
/// dropped without aborting.
async fn aborted(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs a single operation. One worker serves one call; the abort latch is
/// never reset, so a second `start` would be interrupted immediately once
/// the first was aborted.
pub struct CancellableWorker<C> {
    shared: Arc<Shared<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + Sync + 'static> CancellableWorker<C> {
    /// `closer` is invoked on the published resource when the worker aborts.
    /// It must not block.
    pub fn new<F>(closer: F) -> Self
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        let (abort_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(SlotState { aborted: None, resource: None }),
                abort_tx,
                closer: Box::new(closer),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn `operation` and call `on_complete` exactly once with its result,
    /// or with the abort reason if it was aborted first.
    pub fn start<F, Fut, T, D>(&self, operation: F, on_complete: D)
    where
        F: FnOnce(ResourceSlot<C>) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(Outcome<T>) + Send + 'static,
    {
        let shared = self.shared.clone();
        let abort_rx = shared.abort_tx.subscribe();
        let operation = operation(ResourceSlot { shared: shared.clone() });

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = aborted(abort_rx) => {
                    let reason = shared.lock().aborted.clone();
                    tracing::debug!(reason = ?reason, "worker interrupted");
                    Err(reason.unwrap_or(NetError::ConnectionAborted))
                }
                result = operation => result,
            };
            on_complete(outcome);
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Spawn a synchronous blocking `operation` on the blocking pool.
    ///
    /// An abort still completes the worker promptly, but a thread stuck in a
    /// syscall is only released once `closer` breaks the resource it waits on.
    pub fn start_blocking<F, T, D>(&self, operation: F, on_complete: D)
    where
        F: FnOnce(ResourceSlot<C>) -> Outcome<T> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.start(
            move |slot| async move {
                tokio::task::spawn_blocking(move || operation(slot)).await.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "blocking operation did not complete");
                    Err(NetError::ConnectionAborted)
                })
            },
            on_complete,
        );
    }

    /// Forcibly unblock the worker: close its resource and interrupt it.
    /// The worker reports `ConnectionAborted`. Idempotent.
    pub fn abort(&self) {
        self.abort_with(NetError::ConnectionAborted);
    }

    /// Like [`CancellableWorker::abort`], reporting `reason` instead. Only the
    /// first abort's reason is kept.
    pub fn abort_with(&self, reason: NetError) {
        let resource = {
            let mut slot = self.shared.lock();
            if slot.aborted.is_some() {
                return;
            }
            slot.aborted = Some(reason);
            slot.resource.take()
        };
        self.shared.abort_tx.send_replace(true);

        if let Some(resource) = resource.and_then(|weak| weak.upgrade()) {
            tracing::debug!("closing worker resource");
            (self.shared.closer)(&resource);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.lock().aborted.is_some()
    }

    /// The published resource, if it is still alive.
    pub fn resource(&self) -> Option<Arc<C>> {
        self.shared.lock().resource.as_ref().and_then(Weak::upgrade)
    }

    /// True once the worker task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false)
    }
}
