//! Protocol message definitions.

use serde::{Deserialize, Serialize};

use crate::types::{DownlinkMessage, GatewayId, GatewayStatus, UplinkMessage};
use crate::ProtoError;

/// Frames sent from the router to a monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorFrame {
    /// Gateway status report.
    Status {
        /// Reporting gateway.
        gateway_id: GatewayId,
        /// Status as accepted by the router.
        status: GatewayStatus,
    },
    /// Uplink received by a gateway.
    Uplink {
        /// The uplink with trust flag and location filled in.
        uplink: UplinkMessage,
    },
    /// Downlink scheduled on a gateway.
    Downlink {
        /// The scheduled downlink.
        downlink: DownlinkMessage,
    },
}

impl MonitorFrame {
    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Frames sent back from a monitor on a downlink stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorReply {
    /// Acknowledgement of received frames.
    Ack,
    /// The monitor rejected a frame.
    Error {
        /// Reason given by the monitor.
        message: String,
    },
}

impl MonitorReply {
    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Inbound events delivered to the router by the radio bridge and the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    /// Gateway credentials changed.
    Auth {
        /// Gateway.
        gateway_id: GatewayId,
        /// Opaque access token.
        token: String,
        /// Whether the token was validated.
        authenticated: bool,
    },
    /// Gateway status report.
    Status {
        /// Gateway.
        gateway_id: GatewayId,
        /// Status.
        status: GatewayStatus,
    },
    /// Uplink from a gateway.
    Uplink {
        /// Uplink.
        uplink: UplinkMessage,
    },
    /// Downlink request from the broker.
    Downlink {
        /// Scheduling identifier.
        identifier: String,
        /// Downlink.
        downlink: DownlinkMessage,
    },
    /// Gateway connection closed.
    Disconnect {
        /// Gateway.
        gateway_id: GatewayId,
    },
}

impl RouterEvent {
    /// The gateway this event concerns.
    #[must_use]
    pub fn gateway_id(&self) -> &GatewayId {
        match self {
            Self::Auth { gateway_id, .. }
            | Self::Status { gateway_id, .. }
            | Self::Disconnect { gateway_id } => gateway_id,
            Self::Uplink { uplink } => &uplink.gateway_metadata.gateway_id,
            Self::Downlink { downlink, .. } => &downlink.gateway_id,
        }
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}
