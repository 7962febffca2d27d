//! Single-assignment result delivery.
//!
//! A [`DeliveryChannel`] is the gate both the worker and the deadline race
//! to. The first `deliver` flips the state from `Armed` to `Fired` with a
//! compare-and-swap and posts the outcome to the observer; every later
//! `deliver` is dropped.

use crate::base::neterror::NetError;
use crate::runtime::context::DeliveryContext;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Terminal result of one call.
pub type Outcome<T> = Result<T, NetError>;

type Observer<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

const ARMED: u8 = 0;
const FIRED: u8 = 1;

/// Whether a channel has already accepted its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Armed,
    Fired,
}

pub struct DeliveryChannel<T> {
    state: AtomicU8,
    observer: Mutex<Option<Observer<T>>>,
    context: Arc<dyn DeliveryContext>,
}

impl<T: Send + 'static> DeliveryChannel<T> {
    /// Create an armed channel dispatching to `observer` on `context`.
    pub fn new<F>(context: Arc<dyn DeliveryContext>, observer: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self {
            state: AtomicU8::new(ARMED),
            observer: Mutex::new(Some(Box::new(observer))),
            context,
        }
    }

    pub fn state(&self) -> DeliveryState {
        match self.state.load(Ordering::Acquire) {
            ARMED => DeliveryState::Armed,
            _ => DeliveryState::Fired,
        }
    }

    /// Offer an outcome. Returns `true` if this call won the gate.
    pub fn deliver(&self, outcome: Outcome<T>) -> bool {
        if self
            .state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(ok = outcome.is_ok(), "outcome discarded, channel already fired");
            return false;
        }

        // Only the winner reaches here, so the observer is always present.
        let observer = self.observer.lock().unwrap_or_else(|e| e.into_inner()).take();
        match observer {
            Some(observer) => {
                self.context.post_now(Box::new(move || observer(outcome)));
            }
            None => tracing::error!("delivery channel fired without an observer"),
        }
        true
    }
}

impl<T> fmt::Debug for DeliveryChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.state.load(Ordering::Acquire) == ARMED { "Armed" } else { "Fired" };
        f.debug_struct("DeliveryChannel").field("state", &state).finish()
    }
}
