//! Deadline-bounded network calls.
//!
//! - [`timer`]: one-shot alarm posted on a delivery context
//! - [`worker`]: background task that can be interrupted by closing its resource
//! - [`channel`]: at-most-once outcome delivery
//! - [`operation`]: [`GuaranteedTimeoutOperation`], which wires the three together

pub mod channel;
pub mod operation;
pub mod timer;
pub mod worker;

pub use channel::{DeliveryChannel, DeliveryState, Outcome};
pub use operation::{Delivery, GuaranteedTimeoutOperation, Mode};
pub use timer::{DeadlineTimer, TimerHandle};
pub use worker::{CancellableWorker, ResourceSlot};
