use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Service tag carried in every beacon. A receiver drops anything that
/// does not match this exactly; other applications sharing the network
/// are noise, not errors.
pub const SERVICE_NAME: &str = "court-registry-backend";

/// Well-known UDP port beacons are sent to. Distinct from the HTTP API port.
pub const DISCOVERY_PORT: u16 = 41537;

/// Multicast group both sides must agree on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 41, 53);

/// Hop limit for outbound beacons.
pub const MULTICAST_TTL: u32 = 128;

/// Default interval between beacons.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// One discovery beacon: a single UTF-8 JSON object sent as the entire
/// datagram payload. Intentionally carries no address field - the sender's
/// address is taken from the transport, which payload content cannot spoof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Must equal [`SERVICE_NAME`].
    pub service: String,
    /// TCP port the sender's HTTP API listens on.
    pub port: u16,
    /// Epoch milliseconds at send time. Freshness only, never ordering.
    pub timestamp: u64,
}

/// Why an inbound datagram was not accepted as a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not UTF-8 JSON, or not the expected three-field shape.
    Malformed,
    /// Well-formed beacon from an unrelated application.
    ForeignService,
    /// Port 0 is never a reachable API port.
    PortZero,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed => write!(f, "not a valid beacon payload"),
            DecodeError::ForeignService => write!(f, "beacon from a foreign service"),
            DecodeError::PortZero => write!(f, "beacon advertises port 0"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Beacon {
    /// Build a fresh beacon advertising the given API port, stamped now.
    pub fn new(port: u16) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            port,
            timestamp: Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    /// Serialize to the wire payload.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse and validate a datagram payload.
    ///
    /// Ports above 65535 and negative timestamps fail JSON deserialization
    /// into `u16`/`u64` and come back as [`DecodeError::Malformed`].
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let beacon: Beacon = serde_json::from_slice(raw).map_err(|_| DecodeError::Malformed)?;

        if beacon.service != SERVICE_NAME {
            return Err(DecodeError::ForeignService);
        }
        if beacon.port == 0 {
            return Err(DecodeError::PortZero);
        }

        Ok(beacon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let beacon = Beacon {
            service: SERVICE_NAME.to_string(),
            port: 3000,
            timestamp: 1_700_000_000_000,
        };

        let bytes = beacon.encode().unwrap();
        assert_eq!(Beacon::decode(&bytes).unwrap(), beacon);
    }

    #[test]
    fn fresh_beacon_carries_service_tag() {
        let beacon = Beacon::new(8080);
        assert_eq!(beacon.service, SERVICE_NAME);
        assert_eq!(beacon.port, 8080);
        assert!(beacon.timestamp > 0);
    }

    #[test]
    fn rejects_non_json() {
        assert_eq!(Beacon::decode(b"not json"), Err(DecodeError::Malformed));
    }

    #[test]
    fn rejects_non_utf8() {
        assert_eq!(
            Beacon::decode(&[0xff, 0xfe, 0x00, 0x01]),
            Err(DecodeError::Malformed)
        );
    }

    #[test]
    fn rejects_missing_field() {
        let raw = format!(r#"{{"service":"{}","port":3000}}"#, SERVICE_NAME);
        assert_eq!(Beacon::decode(raw.as_bytes()), Err(DecodeError::Malformed));
    }

    #[test]
    fn rejects_foreign_service() {
        let raw = br#"{"service":"other-app","port":8080,"timestamp":1000}"#;
        assert_eq!(Beacon::decode(raw), Err(DecodeError::ForeignService));
    }

    #[test]
    fn rejects_port_out_of_range() {
        let raw = format!(
            r#"{{"service":"{}","port":70000,"timestamp":1000}}"#,
            SERVICE_NAME
        );
        assert_eq!(Beacon::decode(raw.as_bytes()), Err(DecodeError::Malformed));
    }

    #[test]
    fn rejects_port_zero() {
        let raw = format!(
            r#"{{"service":"{}","port":0,"timestamp":1000}}"#,
            SERVICE_NAME
        );
        assert_eq!(Beacon::decode(raw.as_bytes()), Err(DecodeError::PortZero));
    }

    #[test]
    fn rejects_negative_timestamp() {
        let raw = format!(
            r#"{{"service":"{}","port":3000,"timestamp":-5}}"#,
            SERVICE_NAME
        );
        assert_eq!(Beacon::decode(raw.as_bytes()), Err(DecodeError::Malformed));
    }
}
