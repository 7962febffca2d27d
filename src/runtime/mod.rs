//! Delivery execution contexts.
//!
//! - [`context`]: the [`DeliveryContext`] trait and [`CancelHandle`]
//! - [`serial`]: [`SerialExecutor`], a tokio-backed serial queue

pub mod context;
pub mod serial;

pub use context::{CancelHandle, DeliveryContext, Task};
pub use serial::SerialExecutor;
