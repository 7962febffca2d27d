use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// A connected socket, plain or TLS.
pub enum SocketType {
    Tcp(TcpStream),
    Ssl(SslStream<TcpStream>),
}

impl SocketType {
    /// Check if the underlying TCP socket is still connected.
    /// Uses peer_addr() as a lightweight liveness test; it never consumes
    /// data, so pending response bytes stay in the socket.
    fn check_tcp_connected(stream: &TcpStream) -> bool {
        stream.peer_addr().is_ok()
    }

    /// Returns true if the socket is still connected.
    pub fn is_connected(&self) -> bool {
        match self {
            SocketType::Tcp(s) => Self::check_tcp_connected(s),
            SocketType::Ssl(s) => Self::check_tcp_connected(s.get_ref()),
        }
    }

    pub fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            SocketType::Ssl(s) => s.get_ref(),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, SocketType::Ssl(_))
    }
}

impl fmt::Debug for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_secure() { "Ssl" } else { "Tcp" };
        f.debug_tuple(kind).field(&self.tcp().peer_addr().ok()).finish()
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
