//! The interface the router fans gateway events out to.

use async_trait::async_trait;
use lora_proto::{DownlinkMessage, GatewayStatus, UplinkMessage};

use crate::error::Result;

/// A sink for mirrored gateway traffic.
///
/// Implemented by [`MonitorLink`](crate::MonitorLink); the router only sees
/// `Arc<dyn Monitor>` so tests can substitute recording monitors.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Name of the monitor endpoint, used as the registry key and in logs.
    fn name(&self) -> &str;

    /// Replace the credential used for subsequent connections.
    fn set_token(&self, token: &str);

    /// Mirror a status report.
    async fn send_status(&self, status: GatewayStatus) -> Result<()>;

    /// Mirror an uplink.
    async fn send_uplink(&self, uplink: UplinkMessage) -> Result<()>;

    /// Mirror a scheduled downlink. Must not block on the network.
    async fn send_downlink(&self, downlink: DownlinkMessage) -> Result<()>;

    /// Stop the monitor. Idempotent.
    fn close(&self);
}
