//! # lora-proto
//!
//! Message definitions for LoRaWAN router gateway traffic and the frames
//! mirrored to monitor services.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtoError;
pub use messages::{MonitorFrame, MonitorReply, RouterEvent};
pub use types::{
    DownlinkMessage, GatewayId, GatewayMetadata, GatewayStatus, Location, UplinkMessage,
};
