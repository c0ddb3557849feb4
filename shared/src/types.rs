use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Beacon;

/// A backend sighting as the desktop shell consumes it.
/// Built locally on every valid beacon receipt; never sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRecord {
    /// Base URL for API calls, e.g. "http://192.168.1.20:3000"
    pub url: String,

    /// Source address the datagram actually arrived from
    pub ip: IpAddr,

    /// API port advertised in the beacon
    pub port: u16,

    /// Receiver's wall clock at receipt, not the sender's timestamp
    pub last_seen: DateTime<Utc>,
}

impl BackendRecord {
    /// Combine a validated beacon with the transport-observed sender address.
    ///
    /// The address always comes from `source`. On a NATed or multi-homed
    /// sender the address it would report for itself can be wrong; the
    /// address the packet arrived from is the one that is reachable.
    pub fn observed(beacon: &Beacon, source: SocketAddr) -> Self {
        let ip = source.ip();
        let url = match ip {
            IpAddr::V4(v4) => format!("http://{}:{}", v4, beacon.port),
            IpAddr::V6(v6) => format!("http://[{}]:{}", v6, beacon.port),
        };

        Self {
            url,
            ip,
            port: beacon.port,
            last_seen: Utc::now(),
        }
    }
}
