//! # lora-monitor
//!
//! Outbound links from the router to monitor services.
//!
//! This crate provides:
//!
//! - [`MonitorLink`]: one long-lived downlink stream per monitor endpoint,
//!   reopened with exponential backoff whenever it fails
//! - [`Monitor`]: the object-safe interface the router fans events out to
//! - [`MonitorTransport`]: the seam between a link and its wire protocol
//! - [`WsMonitorTransport`]: a WebSocket transport carrying JSON frames
//! - [`Backoff`] / [`BackoffConfig`]: capped exponential retry delays

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod error;
pub mod events;
pub mod link;
pub mod monitor;
pub mod state;
pub mod transport;
pub mod ws;

pub use backoff::{calculate_backoff, Backoff, BackoffConfig};
pub use error::{MonitorError, Result};
pub use events::LinkEvent;
pub use link::{MonitorLink, MonitorLinkBuilder, DEFAULT_QUEUE_CAPACITY};
pub use monitor::Monitor;
pub use state::LinkState;
pub use transport::{AckSource, DownlinkSink, DownlinkStream, MonitorTransport};
pub use ws::WsMonitorTransport;
