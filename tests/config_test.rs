//! Builder and config surface.

use deadlinenet::base::{ErrorKind, NetError};
use deadlinenet::config::{ConnectorConfig, DEFAULT_DEADLINE_MS};
use deadlinenet::deadline::{GuaranteedTimeoutOperation, Mode};
use deadlinenet::socket::TcpTransport;
use std::time::Duration;

#[tokio::test]
async fn test_builder_applies_settings() {
    let op = GuaranteedTimeoutOperation::<TcpTransport>::builder()
        .secure()
        .deadline(Duration::from_millis(750))
        .keep_armed(true)
        .tag("sync")
        .native_connect_timeout(Duration::from_millis(200))
        .build_tcp()
        .unwrap();

    assert_eq!(op.mode(), Mode::Secure);
    assert_eq!(op.deadline(), Duration::from_millis(750));
    assert!(op.config().keep_armed_after_callback);
    assert_eq!(op.tag(), Some("sync"));
    assert_eq!(op.transport().connect_timeout(), Some(Duration::from_millis(200)));
}

#[tokio::test]
async fn test_builder_from_config() {
    let config = ConnectorConfig { mode: Mode::Secure, deadline_ms: 100, ..Default::default() };
    let op = GuaranteedTimeoutOperation::<TcpTransport>::builder()
        .config(config.clone())
        .build_tcp()
        .unwrap();
    assert_eq!(op.config(), &config);
    assert_eq!(op.transport().connect_timeout(), None);
}

#[tokio::test]
async fn test_zero_native_timeout_rejected() {
    let err = GuaranteedTimeoutOperation::<TcpTransport>::builder()
        .native_connect_timeout(Duration::ZERO)
        .build_tcp()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Construction);
    assert_eq!(err.as_i32(), -911);
}

#[test]
fn test_builder_requires_runtime() {
    let err = GuaranteedTimeoutOperation::<TcpTransport>::builder().build_tcp().unwrap_err();
    assert!(matches!(err, NetError::InvalidConfiguration(_)));
}

#[cfg(feature = "json")]
#[test]
fn test_json_round_trip_keeps_defaults() {
    let config = ConnectorConfig::from_json("{}").unwrap();
    assert_eq!(config.deadline_ms, DEFAULT_DEADLINE_MS);
    assert_eq!(config, ConnectorConfig::default());

    let json = ConnectorConfig { tag: Some("a".into()), ..config }.to_json().unwrap();
    assert!(json.contains(r#""mode":"plain""#));
    assert!(json.contains(r#""tag":"a""#));
}
