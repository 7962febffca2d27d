//! # deadlinenet
//!
//! Network connects and body fetches with a guaranteed deadline.
//!
//! A blocking or hung connect/read cannot outlive its deadline: when the
//! deadline fires the worker is aborted, any connection it already produced
//! is forcibly closed, and the observer receives `ConnectionTimedOut`. The
//! observer is invoked exactly once per call, always on the operation's
//! delivery context.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deadlinenet::{GuaranteedTimeoutOperation, TcpTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let op = GuaranteedTimeoutOperation::<TcpTransport>::builder()
//!         .deadline(Duration::from_millis(500))
//!         .build_tcp()?;
//!
//!     let url: url::Url = "http://example.com/".parse()?;
//!     match op.fetch(&url).await {
//!         Ok(body) => println!("{} bytes", body.read_to_end().await?.len()),
//!         Err(e) if e.is_timeout() => println!("timed out"),
//!         Err(e) => println!("failed: {e}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error taxonomy and load state
//! - [`config`] - Operation configuration and builder
//! - [`deadline`] - Timer, worker, delivery channel and the operation itself
//! - [`runtime`] - Delivery contexts
//! - [`socket`] - Transport capability and the TCP/TLS transport

pub mod base;
pub mod config;
pub mod deadline;
pub mod runtime;
pub mod socket;

pub use base::{ErrorKind, LoadState, NetError};
pub use config::{ConnectorBuilder, ConnectorConfig};
pub use deadline::{Delivery, GuaranteedTimeoutOperation, Mode, Outcome};
pub use runtime::{DeliveryContext, SerialExecutor};
pub use socket::{ByteStream, Connection, TcpTransport, Transport};
