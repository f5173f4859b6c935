use crate::domain::PeerRecord;
use std::{collections::HashMap, net::IpAddr, sync::RwLock, time::Duration};
use tracing::info;

/// Peers heard on the discovery channel, keyed by peer id. Stale records are
/// dropped lazily whenever the table is read.
pub struct PeerTable {
    peers: RwLock<HashMap<String, PeerRecord>>,
    peer_timeout: Duration,
}

impl PeerTable {
    pub fn new(peer_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            peer_timeout,
        }
    }

    /// Records a sighting and returns `true` when the id was not known yet.
    pub fn upsert(&self, peer_id: &str, address: IpAddr, port: u16) -> bool {
        self.insert(PeerRecord::new(peer_id.to_string(), address, port))
    }

    pub fn insert(&self, record: PeerRecord) -> bool {
        self.peers.write().is_ok_and(|mut peers| {
            let is_new = !peers.contains_key(&record.peer_id);
            if is_new {
                info!("🟢 Peer discovered: {} at {}", record.peer_id, record.socket_addr());
            }
            peers.insert(record.peer_id.clone(), record);
            is_new
        })
    }

    pub fn snapshot(&self) -> HashMap<String, PeerRecord> {
        self.peers
            .write()
            .map(|mut peers| {
                self.evict_stale(&mut peers);
                peers.clone()
            })
            .unwrap_or_default()
    }

    pub fn resolve(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.write().ok().and_then(|mut peers| {
            self.evict_stale(&mut peers);
            peers.get(peer_id).cloned()
        })
    }

    fn evict_stale(&self, peers: &mut HashMap<String, PeerRecord>) {
        peers.retain(|id, peer| {
            let keep = !peer.is_stale(self.peer_timeout);
            if !keep {
                info!("🔴 Peer timed out: {id}");
            }
            keep
        });
    }
}
