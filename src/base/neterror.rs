use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::deadline::operation::Mode;

/// Coarse classification of a [`NetError`], as surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The deadline elapsed before the operation completed.
    Timeout,
    /// The transport failed while opening the connection.
    Connect,
    /// The transport failed while reading from an open connection.
    Io,
    /// An accessor for the non-configured mode was called.
    ModeMismatch,
    /// The operation could not be constructed.
    Construction,
    /// The worker was interrupted before it produced a result.
    Aborted,
}

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Address in use")]
    AddressInUse,

    // URL / response errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Empty response")]
    EmptyResponse,

    // Context-rich transport errors
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Could not resolve {domain}: {source}")]
    NameNotResolvedFor {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Read failed: {source}")]
    ReadFailed {
        #[source]
        source: Arc<io::Error>,
    },

    // Phase wrappers; the transport error is kept unchanged as the source.
    #[error("Connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: Box<NetError>,
    },
    #[error("Reading from {target} failed: {source}")]
    Io {
        target: String,
        #[source]
        source: Box<NetError>,
    },

    // Caller errors
    #[error("Operation is configured for {configured:?} mode, not {requested:?}")]
    ModeMismatch { requested: Mode, configured: Mode },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::NameNotResolved => -105,
            NetError::SslProtocolError => -107,
            NetError::AddressUnreachable => -109,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::AddressInUse => -147,

            NetError::InvalidUrl => -300,
            NetError::EmptyResponse => -324,

            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::ReadFailed { .. } => -100,
            NetError::Connect { source, .. } | NetError::Io { source, .. } => source.as_i32(),

            // Custom codes (starting at -900, outside Chromium's list)
            NetError::ModeMismatch { .. } => -910,
            NetError::InvalidConfiguration(_) => -911,
            NetError::Unknown(code) => *code,
        }
    }

    /// Classify this error into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::ConnectionTimedOut => ErrorKind::Timeout,
            NetError::ConnectionAborted => ErrorKind::Aborted,
            NetError::ModeMismatch { .. } => ErrorKind::ModeMismatch,
            NetError::InvalidConfiguration(_) => ErrorKind::Construction,
            NetError::Connect { .. } => ErrorKind::Connect,
            NetError::Io { .. } | NetError::ReadFailed { .. } => ErrorKind::Io,
            NetError::ConnectionClosed | NetError::ConnectionReset | NetError::EmptyResponse => {
                ErrorKind::Io
            }
            _ => ErrorKind::Connect,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Build a `ConnectionFailedTo` from an io error.
    pub fn connection_failed_to(host: &str, port: u16, e: io::Error) -> Self {
        NetError::ConnectionFailedTo { host: host.to_string(), port, source: Arc::new(e) }
    }

    /// Build a `NameNotResolvedFor` from an io error.
    pub fn dns_failed(domain: &str, e: io::Error) -> Self {
        NetError::NameNotResolvedFor { domain: domain.to_string(), source: Arc::new(e) }
    }

    /// Underlying transport error of a phase wrapper, or `self`.
    pub fn transport_error(&self) -> &NetError {
        match self {
            NetError::Connect { source, .. } | NetError::Io { source, .. } => source,
            other => other,
        }
    }
}

impl PartialEq for NetError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                NetError::Connect { target: a, source: sa },
                NetError::Connect { target: b, source: sb },
            )
            | (NetError::Io { target: a, source: sa }, NetError::Io { target: b, source: sb }) => {
                a == b && sa == sb
            }
            (
                NetError::ModeMismatch { requested: ra, configured: ca },
                NetError::ModeMismatch { requested: rb, configured: cb },
            ) => ra == rb && ca == cb,
            (
                NetError::ConnectionFailedTo { host: ha, port: pa, .. },
                NetError::ConnectionFailedTo { host: hb, port: pb, .. },
            ) => ha == hb && pa == pb,
            (
                NetError::NameNotResolvedFor { domain: a, .. },
                NetError::NameNotResolvedFor { domain: b, .. },
            ) => a == b,
            (NetError::InvalidConfiguration(a), NetError::InvalidConfiguration(b)) => a == b,
            (NetError::Unknown(a), NetError::Unknown(b)) => a == b,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.as_i32() == other.as_i32()
            }
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -109 => NetError::AddressUnreachable,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -147 => NetError::AddressInUse,

            -300 => NetError::InvalidUrl,
            -324 => NetError::EmptyResponse,
            _ => NetError::Unknown(code),
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::NotConnected => NetError::SocketNotConnected,
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => NetError::AddressUnreachable,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            _ => NetError::ReadFailed { source: Arc::new(e) },
        }
    }
}
