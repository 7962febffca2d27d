//! Transport abstraction consumed by the deadline orchestrator.
//!
//! The orchestrator never touches sockets directly. It asks a [`Transport`]
//! to open a connection in a given [`Mode`], to read a response body from
//! it, and to forcibly disconnect it when a deadline expires.

use crate::base::neterror::NetError;
use crate::deadline::operation::Mode;
use std::{future::Future, pin::Pin, sync::Arc};
use url::Url;

/// Alias for the `Future` returned by [`Transport::connect`].
pub type Connecting<C> = Pin<Box<dyn Future<Output = Result<Arc<C>, NetError>> + Send>>;

/// Alias for the `Future` returned by [`Transport::read_body`].
pub type Reading<B> = Pin<Box<dyn Future<Output = Result<B, NetError>> + Send>>;

/// Opens, reads and tears down connections.
///
/// # Design Notes
///
/// - Uses `&self` so one transport can serve concurrent calls.
/// - Returns boxed futures for trait object compatibility.
/// - `disconnect` runs on the delivery context and must not block.
pub trait Transport: Send + Sync + 'static {
    /// Connection handle handed to the caller on success.
    type Connection: Send + Sync + 'static;

    /// Byte-stream handle produced by [`Transport::read_body`].
    type Body: Send + 'static;

    /// Open a connection to `target`. `mode` decides plain vs TLS; the URL
    /// scheme is not consulted.
    fn connect(&self, target: &Url, mode: Mode) -> Connecting<Self::Connection>;

    /// Close `connection`, unblocking any pending read or write on it.
    fn disconnect(&self, connection: &Self::Connection);

    /// Start reading the response on `connection`; resolves once the first
    /// bytes have arrived.
    fn read_body(&self, connection: Arc<Self::Connection>) -> Reading<Self::Body>;
}

impl<T: Transport> Transport for Arc<T> {
    type Connection = T::Connection;
    type Body = T::Body;

    fn connect(&self, target: &Url, mode: Mode) -> Connecting<Self::Connection> {
        (**self).connect(target, mode)
    }

    fn disconnect(&self, connection: &Self::Connection) {
        (**self).disconnect(connection)
    }

    fn read_body(&self, connection: Arc<Self::Connection>) -> Reading<Self::Body> {
        (**self).read_body(connection)
    }
}
