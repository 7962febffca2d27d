//! Operation configuration and builder.
//!
//! # Example
//!
//! ```rust,ignore
//! use deadlinenet::{GuaranteedTimeoutOperation, Mode};
//! use std::time::Duration;
//!
//! let op = GuaranteedTimeoutOperation::<deadlinenet::TcpTransport>::builder()
//!     .mode(Mode::Secure)
//!     .deadline(Duration::from_secs(5))
//!     .tag("feed-refresh")
//!     .build_tcp()?;
//!
//! let body = op.fetch(&"https://example.com/feed".parse()?).await?;
//! ```

use crate::base::neterror::NetError;
use crate::deadline::operation::{GuaranteedTimeoutOperation, Mode};
use crate::runtime::context::DeliveryContext;
use crate::runtime::serial::SerialExecutor;
use crate::socket::tcp::TcpTransport;
use crate::socket::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Deadline used when none is configured.
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

/// Settings fixed for the lifetime of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Plain or secure connections.
    pub mode: Mode,
    /// Deadline in milliseconds for the awaiting helpers.
    pub deadline_ms: u64,
    /// Keep the deadline armed after a successful delivery.
    pub keep_armed_after_callback: bool,
    /// Label handed to every observer.
    pub tag: Option<String>,
    /// Socket-level connect timeout for the TCP transport.
    pub native_connect_timeout_ms: Option<u64>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Plain,
            deadline_ms: DEFAULT_DEADLINE_MS,
            keep_armed_after_callback: false,
            tag: None,
            native_connect_timeout_ms: None,
        }
    }
}

impl ConnectorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn native_connect_timeout(&self) -> Option<Duration> {
        self.native_connect_timeout_ms.map(Duration::from_millis)
    }

    /// Reject settings under which no call could behave sensibly.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.deadline_ms == 0 {
            return Err(NetError::InvalidConfiguration("deadline must be non-zero".into()));
        }
        if self.native_connect_timeout_ms == Some(0) {
            return Err(NetError::InvalidConfiguration(
                "native connect timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| NetError::InvalidConfiguration(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, NetError> {
        serde_json::to_string(self).map_err(|e| NetError::InvalidConfiguration(e.to_string()))
    }
}

/// Builder for [`GuaranteedTimeoutOperation`].
#[must_use]
#[derive(Default)]
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    context: Option<Arc<dyn DeliveryContext>>,
}

impl ConnectorBuilder {
    /// Start from an existing config.
    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Shorthand for `mode(Mode::Secure)`.
    pub fn secure(self) -> Self {
        self.mode(Mode::Secure)
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn keep_armed(mut self, keep_armed: bool) -> Self {
        self.config.keep_armed_after_callback = keep_armed;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.tag = Some(tag.into());
        self
    }

    /// Only used by [`ConnectorBuilder::build_tcp`].
    pub fn native_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.native_connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Deliver on `context` instead of a fresh [`SerialExecutor`].
    pub fn delivery_context(mut self, context: Arc<dyn DeliveryContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Build over `transport`.
    ///
    /// Without an explicit delivery context this must run inside a tokio
    /// runtime; otherwise it fails with `InvalidConfiguration`.
    pub fn build<T: Transport>(
        self,
        transport: T,
    ) -> Result<GuaranteedTimeoutOperation<T>, NetError> {
        self.config.validate()?;
        let context: Arc<dyn DeliveryContext> = match self.context {
            Some(context) => context,
            None => Arc::new(SerialExecutor::new()?),
        };
        GuaranteedTimeoutOperation::new(self.config, transport, context)
    }

    /// Build over a [`TcpTransport`] honoring the native connect timeout.
    pub fn build_tcp(self) -> Result<GuaranteedTimeoutOperation<TcpTransport>, NetError> {
        let mut transport = TcpTransport::new();
        if let Some(timeout) = self.config.native_connect_timeout() {
            transport = transport.with_connect_timeout(timeout);
        }
        self.build(transport)
    }
}

impl fmt::Debug for ConnectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorBuilder")
            .field("config", &self.config)
            .field("custom_context", &self.context.is_some())
            .finish()
    }
}
