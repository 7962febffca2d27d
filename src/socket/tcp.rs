use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::deadline::operation::Mode;
use crate::socket::client::SocketType;
use crate::socket::stream::{ByteStream, Connection};
use crate::socket::transport::{Connecting, Reading, Transport};
use boring::ssl::{SslConnector, SslMethod};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

/// Transport over tokio TCP, with BoringSSL for [`Mode::Secure`].
///
/// Connect flow: DNS -> TCP -> SSL, roughly net::ConnectJob. An optional
/// native connect timeout bounds DNS + TCP + TLS on its own; the deadline
/// watchdog still applies on top of it.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the connect phase with a socket-level timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    async fn establish(host: &str, port: u16, mode: Mode) -> Result<SocketType, NetError> {
        // 1. DNS Resolution
        let addr_str = format!("{}:{}", host, port);
        let addrs = tokio::net::lookup_host(&addr_str).await.dns_context(host)?;

        // 2. TCP Connect, first address that accepts wins
        let mut stream = None;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "tcp connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let stream = match (stream, last_error) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err::<SocketType, _>(e).connection_context(host, port),
            (None, None) => return Err(NetError::NameNotResolved),
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "set_nodelay failed");
        }

        // 3. SSL Handshake, selected by mode only
        match mode {
            Mode::Plain => Ok(SocketType::Tcp(stream)),
            Mode::Secure => {
                let mut builder = SslConnector::builder(SslMethod::tls())
                    .map_err(|_| NetError::SslProtocolError)?;
                builder.set_alpn_protos(b"\x08http/1.1").map_err(|_| NetError::SslProtocolError)?;
                let config =
                    builder.build().configure().map_err(|_| NetError::SslProtocolError)?;

                let domain = host.trim_start_matches('[').trim_end_matches(']');
                let tls = tokio_boring::connect(config, domain, stream).await.map_err(|e| {
                    tracing::debug!(host = %domain, error = ?e, "SSL handshake failed");
                    NetError::SslProtocolError
                })?;
                Ok(SocketType::Ssl(tls))
            }
        }
    }
}

/// Minimal request head for a body fetch. Keep-alive is disabled so one call
/// maps to one connection.
pub(crate) fn request_head(target: &Url) -> String {
    let mut path = target.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = target.query() {
        path.push('?');
        path.push_str(query);
    }
    let host = target.host_str().unwrap_or_default();
    let host = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nAccept: */*\r\nConnection: close\r\n\r\n")
}

impl Transport for TcpTransport {
    type Connection = Connection;
    type Body = ByteStream;

    fn connect(&self, target: &Url, mode: Mode) -> Connecting<Connection> {
        let target = target.clone();
        let native_timeout = self.connect_timeout;

        Box::pin(async move {
            let host = target.host_str().ok_or(NetError::InvalidUrl)?.to_string();
            let port = target.port_or_known_default().ok_or(NetError::InvalidUrl)?;

            let establishing = Self::establish(&host, port, mode);
            let socket = match native_timeout {
                Some(limit) => tokio::time::timeout(limit, establishing)
                    .await
                    .map_err(|_| NetError::ConnectionTimedOut)??,
                None => establishing.await?,
            };

            tracing::debug!(url = %target, ?mode, "connection established");
            Ok(Arc::new(Connection::new(socket, target, mode)))
        })
    }

    fn disconnect(&self, connection: &Connection) {
        connection.disconnect();
    }

    fn read_body(&self, connection: Arc<Connection>) -> Reading<ByteStream> {
        Box::pin(async move {
            let head = request_head(connection.target());
            connection.write_all(head.as_bytes()).await?;
            match connection.read_chunk().await? {
                Some(first) => Ok(ByteStream::new(connection, first)),
                None => Err(NetError::EmptyResponse),
            }
        })
    }
}
