//! Error types for monitor links.

use thiserror::Error;

/// Errors that can occur while talking to a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Opening a connection or stream to the monitor failed.
    #[error("failed to connect to monitor: {0}")]
    Connect(String),

    /// An open stream failed.
    #[error("monitor stream error: {0}")]
    Stream(String),

    /// The monitor closed the stream.
    #[error("monitor stream closed")]
    StreamClosed,

    /// The outbound queue is full and the downlink was dropped.
    #[error("not sending downlink to monitor, buffer full")]
    BufferFull,

    /// The link was closed.
    #[error("monitor link closed")]
    Closed,

    /// The link was used outside of a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Frame encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] lora_proto::ProtoError),
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(MonitorError::BufferFull, "not sending downlink to monitor, buffer full" ; "buffer full")]
    #[test_case(MonitorError::StreamClosed, "monitor stream closed" ; "stream closed")]
    #[test_case(MonitorError::Closed, "monitor link closed" ; "closed")]
    #[test_case(
        MonitorError::Connect("connection refused".to_string()),
        "failed to connect to monitor: connection refused" ;
        "connect"
    )]
    fn test_error_display(err: MonitorError, expected: &str) {
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: MonitorError = lora_proto::ProtoError::Decoding("eof".to_string()).into();
        assert!(matches!(err, MonitorError::Protocol(_)));
        assert!(err.to_string().contains("decoding error: eof"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MonitorError>();
    }
}
