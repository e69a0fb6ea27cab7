//! Unit tests for error types and conversions

use gerrit_events_core::error::{
    ConfigError, ConnectionError, DecodeError, GerritError, ListenerError, PoolError, TransportError,
};

#[test]
fn test_transport_error_display() {
    let error = TransportError::ConnectFailed {
        host: "review.example.com".to_string(),
        port: 29418,
        reason: "connection refused".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Could not connect to review.example.com:29418: connection refused"
    );

    let error = TransportError::InvalidProxy {
        proxy: "ftp://proxy".to_string(),
    };
    assert_eq!(error.to_string(), "Invalid proxy specification: ftp://proxy");
}

#[test]
fn test_connection_error_display() {
    let error = ConnectionError::AlreadyStarted {
        name: "review".to_string(),
    };
    assert_eq!(error.to_string(), "Connection to review has already been started");
}

#[test]
fn test_pool_error_display() {
    let error = PoolError::InvalidBounds { core: 5, max: 3 };
    assert_eq!(
        error.to_string(),
        "Invalid pool bounds: core size 5 exceeds maximum size 3"
    );
    assert_eq!(PoolError::Rejected.to_string(), "Work rejected: pool is shutting down");
}

#[test]
fn test_listener_error_display() {
    assert_eq!(ListenerError::new("boom").to_string(), "Listener failed: boom");
}

#[test]
fn test_decode_error_from_json() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: DecodeError = json_error.into();
    assert!(matches!(error, DecodeError::Json(_)));
    assert!(error.to_string().starts_with("Invalid JSON: "));
}

#[test]
fn test_gerrit_error_conversions() {
    let error: GerritError = ConfigError::MissingField {
        field: "host".to_string(),
    }
    .into();
    assert!(matches!(error, GerritError::Config(_)));
    assert_eq!(
        error.to_string(),
        "Configuration error: Missing required configuration field: host"
    );

    let error: GerritError = TransportError::NotConnected.into();
    assert!(matches!(error, GerritError::Transport(_)));

    let error: GerritError = PoolError::Rejected.into();
    assert!(matches!(error, GerritError::Pool(_)));
}
