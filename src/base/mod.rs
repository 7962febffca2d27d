//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`]: Network error codes matching `net_error_list.h`
//! - [`LoadState`]: Progress of an in-flight call

pub mod context;
pub mod loadstate;
pub mod neterror;

pub use loadstate::LoadState;
pub use neterror::{ErrorKind, NetError};
