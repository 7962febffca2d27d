//! Connection and body handles produced by [`TcpTransport`].
//!
//! A [`Connection`] owns its socket behind an async mutex and carries a
//! latched `closed` signal. `disconnect()` flips the signal and, if nobody is
//! mid-read, drops the socket right away; a read or write in progress sees
//! the signal, drops the socket itself and fails with `ConnectionAborted`.
//!
//! [`TcpTransport`]: crate::socket::tcp::TcpTransport

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::deadline::operation::Mode;
use crate::socket::client::SocketType;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use url::Url;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Resolves once `closed` is set.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// An open connection to a target.
pub struct Connection {
    socket: Mutex<Option<SocketType>>,
    closed: watch::Sender<bool>,
    target: Url,
    mode: Mode,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(socket: SocketType, target: Url, mode: Mode) -> Self {
        let peer = socket.tcp().peer_addr().ok();
        let (closed, _) = watch::channel(false);
        Self { socket: Mutex::new(Some(socket)), closed, target, mode, peer }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// True once [`Connection::disconnect`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Returns true if the connection has not been closed locally and the
    /// socket still has a peer. A socket busy with a read counts as connected.
    pub fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.socket.try_lock() {
            Ok(guard) => guard.as_ref().map(SocketType::is_connected).unwrap_or(false),
            Err(_) => true,
        }
    }

    /// Close the connection. Never blocks; idempotent.
    pub fn disconnect(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Ok(mut guard) = self.socket.try_lock() {
            guard.take();
        }
        tracing::debug!(url = %self.target, "connection disconnected");
    }

    pub async fn write_all(&self, data: &[u8]) -> Result<(), NetError> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.socket.lock().await;
        if *closed.borrow() {
            guard.take();
            return Err(NetError::ConnectionAborted);
        }
        let Some(socket) = guard.as_mut() else {
            return Err(NetError::SocketNotConnected);
        };

        let written = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => None,
            result = socket.write_all(data) => Some(result),
        };
        match written {
            None => {
                guard.take();
                Err(NetError::ConnectionAborted)
            }
            Some(result) => result.stream_context(),
        }
    }

    /// Read the next chunk. `Ok(None)` means the peer closed the stream.
    pub async fn read_chunk(&self) -> Result<Option<Bytes>, NetError> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.socket.lock().await;
        if *closed.borrow() {
            guard.take();
            return Err(NetError::ConnectionAborted);
        }
        let Some(socket) = guard.as_mut() else {
            return Err(NetError::SocketNotConnected);
        };

        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let read = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => None,
            result = socket.read_buf(&mut buf) => Some(result),
        };
        match read {
            None => {
                guard.take();
                Err(NetError::ConnectionAborted)
            }
            Some(result) => match result.stream_context()? {
                0 => Ok(None),
                _ => Ok(Some(buf.freeze())),
            },
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target.as_str())
            .field("mode", &self.mode)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The raw response byte stream of a body fetch.
///
/// Holds the connection alive; bytes are handed out unparsed.
pub struct ByteStream {
    connection: Arc<Connection>,
    pending: Option<Bytes>,
    finished: bool,
}

impl ByteStream {
    pub fn new(connection: Arc<Connection>, first: Bytes) -> Self {
        Self { connection, pending: Some(first), finished: false }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Next chunk of the response, `Ok(None)` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if let Some(first) = self.pending.take() {
            return Ok(Some(first));
        }
        if self.finished {
            return Ok(None);
        }
        let next = self.connection.read_chunk().await?;
        if next.is_none() {
            self.finished = true;
        }
        Ok(next)
    }

    /// Drain the stream into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes, NetError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("connection", &self.connection)
            .field("buffered", &self.pending.as_ref().map(Bytes::len))
            .field("finished", &self.finished)
            .finish()
    }
}
