//! Link event types.

use std::time::Duration;

/// Events broadcast by a [`MonitorLink`](crate::MonitorLink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A downlink stream was opened.
    Connected,
    /// The open stream failed and was torn down.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Waiting before the next open attempt.
    Reconnecting {
        /// Retry number, starting at 1 after every successful open.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A downlink was dropped because the queue was full.
    Dropped,
    /// The link was closed.
    Closed,
}
