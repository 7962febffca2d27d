/// The current state of an in-flight deadline-guarded call.
/// This roughly matches net/base/load_states.h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// No call is running.
    #[default]
    Idle,

    /// Opening the connection (DNS, TCP handshake, TLS handshake).
    Connecting,

    /// Reading the response body.
    ReadingResponse,
}
