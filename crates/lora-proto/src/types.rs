//! Core types for gateway traffic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtoError;

/// Maximum length of a gateway identifier.
pub const MAX_GATEWAY_ID_LEN: usize = 64;

/// Identifier of a radio gateway.
///
/// Deserializing goes through [`GatewayId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayId(String);

impl GatewayId {
    /// Parse a `GatewayId` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, longer than
    /// [`MAX_GATEWAY_ID_LEN`], or contains characters other than ASCII
    /// alphanumerics, hyphens and underscores.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.is_empty() {
            return Err(ProtoError::Validation("gateway id cannot be empty".to_string()));
        }
        if s.len() > MAX_GATEWAY_ID_LEN {
            return Err(ProtoError::Validation(format!(
                "gateway id cannot exceed {MAX_GATEWAY_ID_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProtoError::Validation(format!(
                "gateway id '{s}' must contain only alphanumeric characters, hyphens, and underscores"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GatewayId {
    type Error = ProtoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<GatewayId> for String {
    fn from(id: GatewayId) -> Self {
        id.0
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic location of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    #[serde(default)]
    pub altitude: i32,
}

impl Location {
    /// Create a new location.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, altitude: i32) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// Periodic status report sent by a gateway.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Gateway concentrator timestamp in microseconds.
    #[serde(default)]
    pub timestamp: u32,
    /// Wall-clock time reported by the gateway, if it has one.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Platform or firmware description.
    #[serde(default)]
    pub platform: Option<String>,
    /// Configured or GPS location.
    #[serde(default)]
    pub location: Option<Location>,
    /// Packets received.
    #[serde(default)]
    pub rx_in: u32,
    /// Packets received with a valid CRC.
    #[serde(default)]
    pub rx_ok: u32,
    /// Packets received for transmission.
    #[serde(default)]
    pub tx_in: u32,
    /// Packets transmitted.
    #[serde(default)]
    pub tx_ok: u32,
    /// Whether the gateway was authenticated when the status was accepted.
    #[serde(default)]
    pub gateway_trusted: bool,
}

/// Radio metadata a gateway attaches to a received frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    /// Receiving gateway.
    pub gateway_id: GatewayId,
    /// Concentrator timestamp in microseconds at reception.
    pub timestamp: u32,
    /// Frequency in Hz.
    pub frequency: u64,
    /// Received signal strength in dBm.
    #[serde(default)]
    pub rssi: f32,
    /// Signal to noise ratio in dB.
    #[serde(default)]
    pub snr: f32,
    /// Gateway location, if known.
    #[serde(default)]
    pub location: Option<Location>,
    /// Whether the gateway was authenticated when the frame was accepted.
    #[serde(default)]
    pub gateway_trusted: bool,
}

/// Frame received by a gateway from an end-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkMessage {
    /// Raw PHY payload.
    pub payload: Vec<u8>,
    /// Reception metadata.
    pub gateway_metadata: GatewayMetadata,
}

/// Frame to be transmitted by a gateway to an end-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkMessage {
    /// Transmitting gateway.
    pub gateway_id: GatewayId,
    /// Raw PHY payload.
    pub payload: Vec<u8>,
    /// Concentrator timestamp at which to transmit.
    pub timestamp: u32,
    /// Frequency in Hz.
    pub frequency: u64,
    /// Transmit power in dBm.
    #[serde(default)]
    pub power: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("gw-1" ; "hyphen")]
    #[test_case("eui_b827ebfffe123456" ; "underscore")]
    #[test_case("A1" ; "short")]
    fn test_gateway_id_accepts(raw: &str) {
        let id = GatewayId::parse(raw).expect("should parse");
        assert_eq!(id.as_str(), raw);
        assert_eq!(id.to_string(), raw);
    }

    #[test_case("" ; "empty")]
    #[test_case("gw 1" ; "space")]
    #[test_case("gw/1" ; "slash")]
    fn test_gateway_id_rejects(raw: &str) {
        assert!(matches!(
            GatewayId::parse(raw),
            Err(ProtoError::Validation(_))
        ));
    }

    #[test]
    fn test_gateway_id_length_limit() {
        assert!(GatewayId::parse(&"a".repeat(MAX_GATEWAY_ID_LEN)).is_ok());
        assert!(GatewayId::parse(&"a".repeat(MAX_GATEWAY_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_gateway_id_serializes_as_string() {
        let id = GatewayId::parse("gw-1").expect("valid id");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"gw-1\"");
    }

    #[test_case(r#""""# ; "empty")]
    #[test_case(r#""gw/1""# ; "slash")]
    #[test_case(r#""gw 1""# ; "space")]
    fn test_gateway_id_deserialize_validates(json: &str) {
        let err = serde_json::from_str::<GatewayId>(json).expect_err("should reject");
        assert!(err.to_string().contains("validation error"), "{err}");
    }

    #[test]
    fn test_uplink_with_invalid_gateway_id_rejected() {
        let json = r#"{
            "payload": [],
            "gateway_metadata": {"gateway_id": "../gw", "timestamp": 1, "frequency": 868100000}
        }"#;
        assert!(serde_json::from_str::<UplinkMessage>(json).is_err());
    }

    #[test]
    fn test_status_defaults_missing_fields() {
        let status: GatewayStatus =
            serde_json::from_str(r#"{"rx_ok": 3}"#).expect("should parse");
        assert_eq!(status.rx_ok, 3);
        assert!(status.location.is_none());
        assert!(!status.gateway_trusted);
    }

    #[test]
    fn test_uplink_without_location() {
        let json = r#"{
            "payload": [64, 1, 2],
            "gateway_metadata": {"gateway_id": "gw-1", "timestamp": 1000, "frequency": 868100000}
        }"#;
        let uplink: UplinkMessage = serde_json::from_str(json).expect("should parse");
        assert_eq!(uplink.gateway_metadata.timestamp, 1000);
        assert!(uplink.gateway_metadata.location.is_none());
        assert_eq!(uplink.payload, vec![64, 1, 2]);
    }
}
