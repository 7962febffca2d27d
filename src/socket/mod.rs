//! Socket and transport handling.
//!
//! - [`transport`]: the [`Transport`] capability the deadline layer consumes
//! - [`tcp`]: DNS → TCP → TLS transport over tokio and BoringSSL
//! - [`stream`]: connection and response byte-stream handles
//! - [`client`]: plain/TLS socket enum

pub mod client;
pub mod stream;
pub mod tcp;
pub mod transport;

pub use stream::{ByteStream, Connection};
pub use tcp::TcpTransport;
pub use transport::{Connecting, Reading, Transport};
