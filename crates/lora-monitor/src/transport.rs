//! Transport seam between monitor links and the wire.
//!
//! A [`MonitorTransport`] opens long-lived downlink streams and carries the
//! one-shot status and uplink frames. Streams come split: the link's drain
//! task owns the [`DownlinkSink`] while the reconnect loop blocks on the
//! [`AckSource`] to notice failures.

use async_trait::async_trait;
use lora_proto::{DownlinkMessage, GatewayId, GatewayStatus, MonitorReply, UplinkMessage};

use crate::error::Result;

/// Write half of a downlink stream.
#[async_trait]
pub trait DownlinkSink: Send {
    /// Write one downlink to the stream.
    async fn send(&mut self, downlink: &DownlinkMessage) -> Result<()>;

    /// Close the send side of the stream.
    async fn close_send(&mut self) -> Result<()>;
}

/// Read half of a downlink stream.
#[async_trait]
pub trait AckSource: Send {
    /// Wait for the next acknowledgement or control frame.
    ///
    /// Any error, including the peer closing the stream, ends the stream.
    async fn recv(&mut self) -> Result<MonitorReply>;
}

/// An open downlink stream.
pub struct DownlinkStream {
    /// Write half.
    pub sink: Box<dyn DownlinkSink>,
    /// Read half.
    pub acks: Box<dyn AckSource>,
}

/// Connection to one monitor endpoint.
#[async_trait]
pub trait MonitorTransport: Send + Sync + 'static {
    /// Open a new downlink stream authenticated with `token`.
    ///
    /// Dropping the returned future abandons the attempt.
    async fn open_downlink_stream(&self, token: &str) -> Result<DownlinkStream>;

    /// Deliver a gateway status report.
    async fn send_status(
        &self,
        token: &str,
        gateway_id: &GatewayId,
        status: &GatewayStatus,
    ) -> Result<()>;

    /// Deliver an uplink.
    async fn send_uplink(&self, token: &str, uplink: &UplinkMessage) -> Result<()>;
}
