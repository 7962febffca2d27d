//! `io::Error` to `NetError` conversion at the transport's call sites.
//!
//! Each helper matches one phase of a call: resolving the host, opening the
//! TCP connection, and moving bytes over an established stream.

use crate::base::neterror::NetError;
use std::io;

/// Attach the phase of a call to an IO failure.
pub trait IoResultExt<T> {
    /// A failed TCP connect to `host:port`.
    ///
    /// ```ignore
    /// let stream = TcpStream::connect(addr).await.connection_context("example.com", 443)?;
    /// // Error: "Connection to example.com:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// A failed lookup of `domain`.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// A failed read or write on an open connection. Well-known kinds keep
    /// their numeric code; anything else becomes `ReadFailed`.
    fn stream_context(self) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn stream_context(self) -> Result<T, NetError> {
        self.map_err(NetError::from)
    }
}
