//! Guaranteed-timeout connect and body fetch.
//!
//! Every call builds a fresh [`DeliveryChannel`], [`DeadlineTimer`] alarm and
//! [`CancellableWorker`]. The alarm and the worker both race to the channel;
//! whichever gets there first decides the single outcome the observer sees.
//!
//! ```text
//! open_connection / fetch_body
//!   ├─ arm deadline ──────────────► expiry: channel.deliver(Err(TimedOut))
//!   │                                       worker.abort_with(TimedOut) if it won
//!   │                                       (or keep_armed)
//!   └─ worker: connect ─► publish ─► [read_body] ─► channel.deliver(result)
//!                                                     └─ disarm unless keep_armed
//! ```

use super::channel::{DeliveryChannel, Outcome};
use super::timer::{DeadlineTimer, TimerHandle};
use super::worker::{CancellableWorker, ResourceSlot};
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::config::{ConnectorBuilder, ConnectorConfig};
use crate::runtime::context::DeliveryContext;
use crate::socket::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Connection variant, fixed when the operation is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain TCP.
    #[default]
    Plain,
    /// TLS over TCP.
    Secure,
}

/// What an observer receives: the operation's tag and the call's outcome.
#[derive(Debug)]
pub struct Delivery<T> {
    pub tag: Option<Arc<str>>,
    pub outcome: Outcome<T>,
}

impl<T> Delivery<T> {
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn into_result(self) -> Outcome<T> {
        self.outcome
    }
}

#[derive(Clone, Default)]
struct LoadTracker(Arc<Mutex<LoadState>>);

impl LoadTracker {
    fn set(&self, state: LoadState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn get(&self) -> LoadState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State of one call, kept so accessors can reach it.
struct Call<C> {
    id: u64,
    worker: Arc<CancellableWorker<C>>,
    load: LoadTracker,
    deadline: TimerHandle,
}

pub struct GuaranteedTimeoutOperation<T: Transport> {
    transport: Arc<T>,
    context: Arc<dyn DeliveryContext>,
    config: ConnectorConfig,
    tag: Option<Arc<str>>,
    next_call: AtomicU64,
    current: Mutex<Option<Arc<Call<T::Connection>>>>,
}

impl<T: Transport> GuaranteedTimeoutOperation<T> {
    /// Create a builder.
    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::default()
    }

    /// Create an operation delivering on `context`.
    ///
    /// Fails with `InvalidConfiguration` if `config` does not validate.
    pub fn new(
        config: ConnectorConfig,
        transport: T,
        context: Arc<dyn DeliveryContext>,
    ) -> Result<Self, NetError> {
        config.validate()?;
        let tag = config.tag.as_deref().map(Arc::from);
        Ok(Self {
            transport: Arc::new(transport),
            context,
            config,
            tag,
            next_call: AtomicU64::new(1),
            current: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Deadline used by [`connect`](Self::connect) and [`fetch`](Self::fetch).
    pub fn deadline(&self) -> Duration {
        self.config.deadline()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open a connection to `target` within `deadline`.
    ///
    /// `observer` runs exactly once on the delivery context. With
    /// `keep_armed` the deadline stays armed after a successful connect and
    /// will forcibly disconnect the connection when it expires.
    pub fn open_connection<O>(
        &self,
        target: &Url,
        deadline: Duration,
        keep_armed: bool,
        observer: O,
    ) where
        O: FnOnce(Delivery<Arc<T::Connection>>) + Send + 'static,
    {
        let transport = self.transport.clone();
        let mode = self.mode();
        let url = target.clone();

        self.run(target, deadline, keep_armed, observer, move |slot, load| async move {
            load.set(LoadState::Connecting);
            connect_phase(&*transport, &url, mode, &slot).await
        });
    }

    /// Open a connection to `target` and start reading its response, both
    /// within one `deadline`.
    pub fn fetch_body<O>(
        &self,
        target: &Url,
        deadline: Duration,
        keep_armed: bool,
        observer: O,
    ) where
        O: FnOnce(Delivery<T::Body>) + Send + 'static,
    {
        let transport = self.transport.clone();
        let mode = self.mode();
        let url = target.clone();

        self.run(target, deadline, keep_armed, observer, move |slot, load| async move {
            load.set(LoadState::Connecting);
            let connection = connect_phase(&*transport, &url, mode, &slot).await?;

            load.set(LoadState::ReadingResponse);
            transport
                .read_body(connection)
                .await
                .map_err(|e| NetError::Io { target: url.to_string(), source: Box::new(e) })
        });
    }

    /// [`open_connection`](Self::open_connection) with the configured
    /// deadline and keep-armed policy, awaiting the outcome.
    pub async fn connect(&self, target: &Url) -> Outcome<Arc<T::Connection>> {
        let (tx, rx) = oneshot::channel();
        self.open_connection(
            target,
            self.deadline(),
            self.config.keep_armed_after_callback,
            move |delivery| {
                let _ = tx.send(delivery.outcome);
            },
        );
        rx.await.unwrap_or(Err(NetError::ConnectionAborted))
    }

    /// [`fetch_body`](Self::fetch_body) with the configured deadline and
    /// keep-armed policy, awaiting the outcome.
    pub async fn fetch(&self, target: &Url) -> Outcome<T::Body> {
        let (tx, rx) = oneshot::channel();
        self.fetch_body(
            target,
            self.deadline(),
            self.config.keep_armed_after_callback,
            move |delivery| {
                let _ = tx.send(delivery.outcome);
            },
        );
        rx.await.unwrap_or(Err(NetError::ConnectionAborted))
    }

    /// Live connection of the most recent call, for a plain operation.
    pub fn plain_connection(&self) -> Result<Option<Arc<T::Connection>>, NetError> {
        self.live_connection(Mode::Plain)
    }

    /// Live connection of the most recent call, for a secure operation.
    pub fn secure_connection(&self) -> Result<Option<Arc<T::Connection>>, NetError> {
        self.live_connection(Mode::Secure)
    }

    fn live_connection(&self, requested: Mode) -> Result<Option<Arc<T::Connection>>, NetError> {
        if requested != self.mode() {
            return Err(NetError::ModeMismatch { requested, configured: self.mode() });
        }
        Ok(self.current_call().and_then(|call| call.worker.resource()))
    }

    /// Abort the most recent call: its worker is interrupted and its
    /// connection closed. An undelivered call reports `ConnectionAborted`.
    pub fn abort(&self) {
        if let Some(call) = self.current_call() {
            tracing::debug!(call = call.id, "manual abort");
            call.worker.abort();
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.current_call().map(|call| call.load.get()).unwrap_or_default()
    }

    /// True while the most recent call's deadline can still fire.
    pub fn is_deadline_armed(&self) -> bool {
        self.current_call().map(|call| call.deadline.is_armed()).unwrap_or(false)
    }

    fn current_call(&self) -> Option<Arc<Call<T::Connection>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn run<P, O, F, Fut>(
        &self,
        target: &Url,
        deadline: Duration,
        keep_armed: bool,
        observer: O,
        operation: F,
    ) where
        P: Send + 'static,
        O: FnOnce(Delivery<P>) + Send + 'static,
        F: FnOnce(ResourceSlot<T::Connection>, LoadTracker) -> Fut,
        Fut: Future<Output = Outcome<P>> + Send + 'static,
    {
        let id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let deadline_ms = deadline.as_millis() as u64;
        tracing::debug!(
            call = id,
            url = %target,
            deadline_ms,
            mode = ?self.mode(),
            keep_armed,
            "call started"
        );

        let tag = self.tag.clone();
        let channel = Arc::new(DeliveryChannel::new(self.context.clone(), move |outcome| {
            observer(Delivery { tag, outcome })
        }));

        let transport = self.transport.clone();
        let worker = Arc::new(CancellableWorker::new(move |connection: &T::Connection| {
            transport.disconnect(connection)
        }));

        let timer = DeadlineTimer::new(self.context.clone());
        let expiry_worker = worker.clone();
        let expiry_channel = channel.clone();
        let url = target.to_string();
        let handle = timer.arm(deadline, move || {
            // The gate decides first: a call the worker already won is left
            // alone unless the caller asked for the deadline to outlive it.
            let won = expiry_channel.deliver(Err(NetError::ConnectionTimedOut));
            if !won && !keep_armed {
                tracing::trace!(call = id, "deadline expired after delivery, ignored");
                return;
            }
            tracing::warn!(call = id, url = %url, deadline_ms, won, "deadline expired, aborting");
            expiry_worker.abort_with(NetError::ConnectionTimedOut);
        });

        let load = LoadTracker::default();
        let call = Arc::new(Call {
            id,
            worker: worker.clone(),
            load: load.clone(),
            deadline: handle.clone(),
        });
        let previous = self.current.lock().unwrap_or_else(|e| e.into_inner()).replace(call);
        if let Some(previous) = previous {
            if previous.deadline.is_armed() {
                tracing::debug!(call = id, previous = previous.id, "replacing in-flight call");
            }
        }

        let done_load = load.clone();
        worker.start(
            move |slot| operation(slot, load),
            move |outcome| {
                done_load.set(LoadState::Idle);
                let ok = outcome.is_ok();
                if channel.deliver(outcome) {
                    tracing::debug!(call = id, ok, "outcome delivered");
                    if !keep_armed {
                        timer.disarm(&handle);
                    }
                }
            },
        );
    }
}

async fn connect_phase<T: Transport>(
    transport: &T,
    url: &Url,
    mode: Mode,
    slot: &ResourceSlot<T::Connection>,
) -> Result<Arc<T::Connection>, NetError> {
    let connection = transport
        .connect(url, mode)
        .await
        .map_err(|e| NetError::Connect { target: url.to_string(), source: Box::new(e) })?;
    // Published before anything else can block, so the deadline can close it.
    slot.publish(&connection)?;
    Ok(connection)
}

impl<T: Transport> fmt::Debug for GuaranteedTimeoutOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuaranteedTimeoutOperation")
            .field("config", &self.config)
            .field("load_state", &self.load_state())
            .finish()
    }
}
