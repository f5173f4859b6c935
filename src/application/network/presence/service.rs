use crate::{
    application::network::{
        join_bounded,
        presence::{PeerTable, PresenceInterface},
    },
    domain::{EventSender, PeerEvent, PeerRecord},
    infra::network::udp::UdpBroadcaster,
    proto::{Frame, FrameKind, wire},
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};
use tokio::{io, sync::watch, task::JoinHandle, time};
use tracing::{debug, error, info, warn};

const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct DiscoveryService<P: PresenceInterface> {
    local_id: String,
    broadcast_interval: Duration,
    peers: Arc<PeerTable>,
    events: EventSender,
    running: Option<Running>,
    _adapter: std::marker::PhantomData<fn() -> P>,
}

struct Running {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    tasks: [JoinHandle<()>; 2],
}

impl<P: PresenceInterface> DiscoveryService<P> {
    pub fn new(
        local_id: String,
        broadcast_interval: Duration,
        peers: Arc<PeerTable>,
        events: EventSender,
    ) -> Self {
        Self {
            local_id,
            broadcast_interval,
            peers,
            events,
            running: None,
            _adapter: std::marker::PhantomData,
        }
    }

    /// Spawns the broadcast and listen loops over `adapter`, announcing
    /// `advertised_port` as the messaging port. The adapter is owned by the
    /// loops, so the endpoint closes once both have exited.
    pub fn start(&mut self, adapter: P, advertised_port: u16) -> io::Result<u16> {
        if let Some(running) = &self.running {
            return Ok(running.port);
        }

        let announcement = wire::encode(&Frame::new(
            self.local_id.clone(),
            FrameKind::PeerDiscovery {
                peer_id: self.local_id.clone(),
                port: advertised_port,
            },
        ))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let port = adapter.local_port();
        let adapter = Arc::new(adapter);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broadcast_task = tokio::spawn(broadcast_loop(
            adapter.clone(),
            announcement,
            self.broadcast_interval,
            shutdown_rx.clone(),
        ));
        let listen_task = tokio::spawn(listen_loop(
            adapter,
            self.local_id.clone(),
            self.peers.clone(),
            self.events.clone(),
            shutdown_rx,
        ));

        info!(port, "📡 Discovery started");

        self.running = Some(Running {
            port,
            shutdown_tx,
            tasks: [broadcast_task, listen_task],
        });
        Ok(port)
    }

    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        for task in running.tasks {
            join_bounded(task, "discovery").await;
        }
        info!("📡 Discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    pub fn get_peers(&self) -> HashMap<String, PeerRecord> {
        self.peers.snapshot()
    }

    pub fn resolve(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.resolve(peer_id)
    }
}

impl DiscoveryService<UdpBroadcaster> {
    pub fn start_udp(
        &mut self,
        port: u16,
        broadcast_addr: Ipv4Addr,
        advertised_port: u16,
    ) -> io::Result<u16> {
        if let Some(running) = &self.running {
            return Ok(running.port);
        }

        let adapter = UdpBroadcaster::bind(port, broadcast_addr)?;
        self.start(adapter, advertised_port)
    }
}

async fn broadcast_loop<P: PresenceInterface>(
    adapter: Arc<P>,
    announcement: Vec<u8>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut error_logged = false;

    loop {
        if let Err(e) = adapter.broadcast(&announcement).await
            && !error_logged
        {
            warn!("Broadcast not available ({e}). Discovery still works by listening.");
            error_logged = true;
        }

        tokio::select! {
            _ = time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn listen_loop<P: PresenceInterface>(
    adapter: Arc<P>,
    local_id: String,
    peers: Arc<PeerTable>,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = adapter.recv() => match res {
                Ok((data, src_ip)) => handle_datagram(&local_id, &peers, &events, &data, src_ip),
                Err(e) => {
                    error!("Error listening for peers: {e}");
                    tokio::select! {
                        _ = time::sleep(RECV_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

fn handle_datagram(
    local_id: &str,
    peers: &PeerTable,
    events: &EventSender,
    data: &[u8],
    src_ip: IpAddr,
) {
    let frame = match wire::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(ip = ?src_ip, "Ignoring datagram: {e}");
            return;
        }
    };

    let FrameKind::PeerDiscovery { peer_id, port } = frame.kind else {
        debug!(ip = ?src_ip, kind = %frame.kind, "Ignoring non-discovery datagram");
        return;
    };

    if peer_id == local_id {
        return;
    }

    if peers.upsert(&peer_id, src_ip, port) {
        let _ = events.send(PeerEvent::PeerDiscovered {
            peer_id,
            address: src_ip,
            port,
        });
    }
}
