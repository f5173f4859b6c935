use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, SystemTime},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: IpAddr,
    pub port: u16,
    pub last_seen: SystemTime,
}

impl PeerRecord {
    pub fn new(peer_id: String, address: IpAddr, port: u16) -> Self {
        Self {
            peer_id,
            address,
            port,
            last_seen: SystemTime::now(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// A clock that went backwards never makes a record stale.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen
            .elapsed()
            .map(|e| e > timeout)
            .unwrap_or(false)
    }
}
