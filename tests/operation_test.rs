//! Deadline behavior of GuaranteedTimeoutOperation over a scripted transport.
//!
//! Runs on paused tokio time, so a "2 second connect" takes no wall time.

use bytes::Bytes;
use deadlinenet::base::{ErrorKind, LoadState, NetError};
use deadlinenet::deadline::{Delivery, GuaranteedTimeoutOperation, Mode};
use deadlinenet::runtime::{CancelHandle, DeliveryContext, SerialExecutor, Task};
use deadlinenet::socket::{Connecting, Reading, Transport};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use url::Url;

/// How a scripted phase behaves.
#[derive(Clone, Debug)]
enum Step {
    After(Duration),
    Fail(NetError),
    /// Never completes on its own; only a disconnect releases it.
    Hang,
}

#[derive(Debug)]
struct MockConnection {
    closed: AtomicBool,
    wake: Notify,
}

impl MockConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Increments a counter when the future holding it is dropped.
struct DropGuard(Arc<AtomicUsize>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MockTransport {
    connect: Step,
    read: Step,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    released: Arc<AtomicUsize>,
    modes: Mutex<Vec<Mode>>,
}

impl MockTransport {
    fn new(connect: Step, read: Step) -> Arc<Self> {
        Arc::new(Self {
            connect,
            read,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            modes: Mutex::new(Vec::new()),
        })
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;
    type Body = Bytes;

    fn connect(&self, _target: &Url, mode: Mode) -> Connecting<MockConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        let step = self.connect.clone();
        let guard = DropGuard(self.released.clone());
        Box::pin(async move {
            let _guard = guard;
            match step {
                Step::After(delay) => tokio::time::sleep(delay).await,
                Step::Fail(e) => return Err(e),
                Step::Hang => std::future::pending::<()>().await,
            }
            Ok(Arc::new(MockConnection { closed: AtomicBool::new(false), wake: Notify::new() }))
        })
    }

    fn disconnect(&self, connection: &MockConnection) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        connection.closed.store(true, Ordering::Release);
        connection.wake.notify_waiters();
    }

    fn read_body(&self, connection: Arc<MockConnection>) -> Reading<Bytes> {
        let step = self.read.clone();
        let guard = DropGuard(self.released.clone());
        Box::pin(async move {
            let _guard = guard;
            match step {
                Step::After(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\nhello"))
                }
                Step::Fail(e) => Err(e),
                Step::Hang => {
                    while !connection.is_closed() {
                        connection.wake.notified().await;
                    }
                    Err(NetError::ConnectionAborted)
                }
            }
        })
    }
}

type Op = GuaranteedTimeoutOperation<Arc<MockTransport>>;

fn operation(transport: &Arc<MockTransport>, mode: Mode) -> Op {
    GuaranteedTimeoutOperation::<Arc<MockTransport>>::builder()
        .mode(mode)
        .tag("mock")
        .build(transport.clone())
        .unwrap()
}

fn target() -> Url {
    Url::parse("http://example.test/feed").unwrap()
}

fn collector<T: Send + 'static>() -> (
    impl FnOnce(Delivery<T>) + Send + 'static,
    mpsc::UnboundedReceiver<Delivery<T>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |delivery| {
            let _ = tx.send(delivery);
        },
        rx,
    )
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<Delivery<T>>) -> Delivery<T> {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no delivery")
        .expect("observer dropped")
}

#[tokio::test(start_paused = true)]
async fn test_slow_connect_times_out_at_deadline() {
    let transport = MockTransport::new(Step::After(Duration::from_secs(2)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    let start = Instant::now();
    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    let delivery = next(&mut rx).await;
    let elapsed = start.elapsed();

    let err = delivery.into_result().unwrap_err();
    assert_eq!(err, NetError::ConnectionTimedOut);
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600), "delivered after {elapsed:?}");

    // The connect future was dropped, nothing was left to close.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(transport.released(), 1);
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fast_connect_succeeds_and_delivers_once() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(50)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    let connection = next(&mut rx).await.into_result().unwrap();
    assert!(!op.is_deadline_armed());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(rx.try_recv().is_err());
    assert!(!connection.is_closed());
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_keep_armed_disconnects_live_connection_at_deadline() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(50)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_millis(500), true, observer);
    let connection = next(&mut rx).await.into_result().unwrap();
    assert!(op.is_deadline_armed());
    assert!(!connection.is_closed());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(connection.is_closed());
    assert_eq!(transport.disconnects(), 1);
    // The expiry must not produce a second delivery.
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_hung_read_is_released_by_deadline() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(10)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.fetch_body(&target(), Duration::from_millis(300), false, observer);
    let err = next(&mut rx).await.into_result().unwrap_err();
    assert!(err.is_timeout());

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Connection closed and the pending read future dropped: the worker is gone.
    assert_eq!(transport.disconnects(), 1);
    assert_eq!(transport.released(), 2);
    assert_eq!(op.load_state(), LoadState::Idle);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_body_within_deadline() {
    let transport = MockTransport::new(
        Step::After(Duration::from_millis(20)),
        Step::After(Duration::from_millis(30)),
    );
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.fetch_body(&target(), Duration::from_millis(500), false, observer);
    let body = next(&mut rx).await.into_result().unwrap();
    assert!(body.ends_with(b"hello"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_is_wrapped_as_connect_error() {
    let transport =
        MockTransport::new(Step::Fail(NetError::ConnectionRefused), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    let err = next(&mut rx).await.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert_eq!(err.transport_error(), &NetError::ConnectionRefused);
    assert_eq!(err.as_i32(), -102);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_is_wrapped_as_io_error() {
    let transport = MockTransport::new(
        Step::After(Duration::from_millis(10)),
        Step::Fail(NetError::ConnectionReset),
    );
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.fetch_body(&target(), Duration::from_millis(500), false, observer);
    let err = next(&mut rx).await.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.transport_error(), &NetError::ConnectionReset);
}

#[tokio::test(start_paused = true)]
async fn test_mode_accessors() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(10)), Step::Hang);
    let plain = operation(&transport, Mode::Plain);

    assert!(plain.plain_connection().unwrap().is_none());
    let err = plain.secure_connection().unwrap_err();
    assert_eq!(err, NetError::ModeMismatch { requested: Mode::Secure, configured: Mode::Plain });
    assert_eq!(err.kind(), ErrorKind::ModeMismatch);

    let (observer, mut rx) = collector();
    plain.open_connection(&target(), Duration::from_millis(500), false, observer);
    let connection = next(&mut rx).await.into_result().unwrap();
    let live = plain.plain_connection().unwrap().unwrap();
    assert!(Arc::ptr_eq(&connection, &live));

    let secure = operation(&transport, Mode::Secure);
    let err = secure.plain_connection().unwrap_err();
    assert_eq!(err, NetError::ModeMismatch { requested: Mode::Plain, configured: Mode::Secure });
    assert!(secure.secure_connection().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_mode_decides_transport_variant_not_scheme() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(10)), Step::Hang);
    let op = operation(&transport, Mode::Secure);

    op.connect(&Url::parse("http://example.test/").unwrap()).await.unwrap();
    assert_eq!(*transport.modes.lock().unwrap(), vec![Mode::Secure]);
}

#[tokio::test(start_paused = true)]
async fn test_tag_reaches_observer() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(10)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    assert_eq!(op.tag(), Some("mock"));

    let (observer, mut rx) = collector();
    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    let delivery = next(&mut rx).await;
    assert_eq!(delivery.tag(), Some("mock"));
}

#[tokio::test(start_paused = true)]
async fn test_manual_abort_reports_aborted() {
    let transport = MockTransport::new(Step::Hang, Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_secs(5), false, observer);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(op.load_state(), LoadState::Connecting);

    op.abort();
    let err = next(&mut rx).await.into_result().unwrap_err();
    assert_eq!(err, NetError::ConnectionAborted);
    assert_eq!(err.kind(), ErrorKind::Aborted);

    // The deadline was disarmed by the delivery.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_load_state_tracks_phases() {
    let transport = MockTransport::new(
        Step::After(Duration::from_millis(100)),
        Step::After(Duration::from_millis(100)),
    );
    let op = operation(&transport, Mode::Plain);
    assert_eq!(op.load_state(), LoadState::Idle);

    let (observer, mut rx) = collector();
    op.fetch_body(&target(), Duration::from_secs(1), false, observer);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(op.load_state(), LoadState::Connecting);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(op.load_state(), LoadState::ReadingResponse);

    next(&mut rx).await.into_result().unwrap();
    assert_eq!(op.load_state(), LoadState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_calls_each_get_their_outcome() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(200)), Step::Hang);
    let op = operation(&transport, Mode::Plain);
    let (slow, mut slow_rx) = collector();
    let (fast, mut fast_rx) = collector();

    op.open_connection(&target(), Duration::from_millis(100), false, slow);
    op.open_connection(&target(), Duration::from_millis(500), false, fast);

    assert!(next(&mut slow_rx).await.into_result().unwrap_err().is_timeout());
    assert!(next(&mut fast_rx).await.into_result().is_ok());
    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_awaiting_helpers_use_configured_deadline() {
    let transport = MockTransport::new(Step::Hang, Step::Hang);
    let op = GuaranteedTimeoutOperation::<Arc<MockTransport>>::builder()
        .deadline(Duration::from_millis(250))
        .build(transport.clone())
        .unwrap();

    let start = Instant::now();
    let err = op.connect(&target()).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_millis(300));

    let err = op.fetch(&target()).await.unwrap_err();
    assert!(err.is_timeout());
}

/// Counts what runs on it, forwarding to a serial executor.
struct CountingContext {
    inner: SerialExecutor,
    posted: AtomicUsize,
}

impl DeliveryContext for CountingContext {
    fn post_now(&self, task: Task) {
        self.posted.fetch_add(1, Ordering::SeqCst);
        self.inner.post_now(task);
    }

    fn post_after(&self, task: Task, delay: Duration) -> CancelHandle {
        self.inner.post_after(task, delay)
    }
}

#[tokio::test(start_paused = true)]
async fn test_observer_runs_on_delivery_context() {
    let context = Arc::new(CountingContext {
        inner: SerialExecutor::new().unwrap(),
        posted: AtomicUsize::new(0),
    });
    let transport = MockTransport::new(Step::After(Duration::from_millis(10)), Step::Hang);
    let op = GuaranteedTimeoutOperation::<Arc<MockTransport>>::builder()
        .delivery_context(context.clone())
        .build(transport)
        .unwrap();

    let (observer, mut rx) = collector();
    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    next(&mut rx).await.into_result().unwrap();
    assert_eq!(context.posted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_deadline_is_construction_error() {
    let transport = MockTransport::new(Step::Hang, Step::Hang);
    let err = GuaranteedTimeoutOperation::<Arc<MockTransport>>::builder()
        .deadline(Duration::ZERO)
        .build(transport)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Construction);
}

/// Lets every delayed task run even after it was cancelled, the way an
/// expiry already dequeued when the worker wins would.
struct LateExpiryContext {
    inner: SerialExecutor,
}

impl DeliveryContext for LateExpiryContext {
    fn post_now(&self, task: Task) {
        self.inner.post_now(task);
    }

    fn post_after(&self, task: Task, delay: Duration) -> CancelHandle {
        self.inner.post_after(task, delay)
    }

    fn cancel(&self, _handle: &CancelHandle) {}
}

fn late_expiry_operation(transport: &Arc<MockTransport>) -> Op {
    GuaranteedTimeoutOperation::<Arc<MockTransport>>::builder()
        .delivery_context(Arc::new(LateExpiryContext { inner: SerialExecutor::new().unwrap() }))
        .build(transport.clone())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_expiry_after_worker_won_leaves_connection_open() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(50)), Step::Hang);
    let op = late_expiry_operation(&transport);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_millis(500), false, observer);
    let connection = next(&mut rx).await.into_result().unwrap();

    // The expiry still runs at 500ms, but it lost the gate.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!connection.is_closed());
    assert_eq!(transport.disconnects(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_after_worker_won_still_closes_when_kept_armed() {
    let transport = MockTransport::new(Step::After(Duration::from_millis(50)), Step::Hang);
    let op = late_expiry_operation(&transport);
    let (observer, mut rx) = collector();

    op.open_connection(&target(), Duration::from_millis(500), true, observer);
    let connection = next(&mut rx).await.into_result().unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(connection.is_closed());
    assert_eq!(transport.disconnects(), 1);
    assert!(rx.try_recv().is_err());
}
