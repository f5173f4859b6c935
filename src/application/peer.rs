use crate::{
    application::{
        network::{DiscoveryService, FrameHandler, MessagingService, PeerTable, TransportError},
        transfer::TransferManager,
    },
    config::Config,
    domain::{
        ActiveTransfer, Destination, EventSender, PeerEvent, PeerRecord, TransferRequest,
        TransferStatus,
    },
    infra::network::{tcp::TcpSender, udp::UdpBroadcaster},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
    sync::mpsc::{self, UnboundedReceiver},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type PeerResult<T> = Result<T, PeerError>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer is not running")]
    NotRunning,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("transfer {0} is not awaiting an answer")]
    InvalidTransferState(String),

    #[error("cannot open {}: {source}", path.display())]
    Destination { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A LAN chat peer: discovery over UDP broadcast plus messaging and file
/// transfer over TCP. Activity is reported on the event channel returned by
/// [`Peer::new`].
pub struct Peer {
    config: Config,
    core: Arc<PeerCore>,
    messaging: MessagingService<PeerCore>,
    discovery: DiscoveryService<UdpBroadcaster>,
}

impl Peer {
    pub fn new(config: Config) -> (Self, UnboundedReceiver<PeerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let local_id = config
            .peer_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(short_id);

        let peers = Arc::new(PeerTable::new(config.peer_timeout()));
        let sender = TcpSender::new(
            local_id.clone(),
            config.control_timeout(),
            config.file_timeout(),
            config.chunk_size,
        );

        let core = Arc::new(PeerCore {
            sender: sender.clone(),
            transfers: Arc::new(TransferManager::new()),
            events: events.clone(),
        });

        let messaging = MessagingService::new(
            core.clone(),
            sender,
            config.file_timeout(),
            config.max_frames_per_connection,
        );
        let discovery =
            DiscoveryService::new(local_id, config.broadcast_interval(), peers, events);

        (
            Self {
                config,
                core,
                messaging,
                discovery,
            },
            events_rx,
        )
    }

    /// Starts messaging first so discovery can advertise the bound port.
    pub async fn start(&mut self) -> io::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let port = self.messaging.start(self.config.ports.transport).await?;

        if let Err(e) = self.discovery.start_udp(
            self.config.ports.discovery,
            self.config.broadcast_addr,
            port,
        ) {
            warn!("Discovery failed to start: {e}");
            self.messaging.stop().await;
            return Err(e);
        }

        info!(peer_id = %self.peer_id(), port, "🚀 Peer started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.discovery.stop().await;
        self.messaging.stop().await;
        info!(peer_id = %self.peer_id(), "🛑 Peer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.messaging.is_running() && self.discovery.is_running()
    }

    pub fn peer_id(&self) -> &str {
        self.core.sender.local_id()
    }

    pub fn port(&self) -> Option<u16> {
        self.messaging.local_port()
    }

    pub fn discovery_port(&self) -> Option<u16> {
        self.discovery.local_port()
    }

    pub fn get_known_peers(&self) -> HashMap<String, PeerRecord> {
        if !self.is_running() {
            return HashMap::new();
        }
        self.discovery.get_peers()
    }

    pub async fn send_message(&self, peer_id: &str, text: &str) -> PeerResult<()> {
        self.deliver_message(peer_id, text)
            .await
            .inspect_err(|e| warn!(peer = peer_id, "Message not sent: {e}"))
    }

    /// Offers `path` to `peer_id` and returns the new transfer id.
    pub async fn send_file(&self, peer_id: &str, path: impl AsRef<Path>) -> PeerResult<String> {
        let path = path.as_ref();

        self.offer_file(peer_id, path)
            .await
            .inspect_err(|e| warn!(peer = peer_id, "File offer not sent: {e}"))
    }

    /// Opens `save_path` and tells the sender to start streaming.
    pub async fn accept_file(&self, file_id: &str, save_path: impl AsRef<Path>) -> PeerResult<()> {
        let save_path = save_path.as_ref();

        self.answer_accept(file_id, save_path)
            .await
            .inspect_err(|e| warn!(file_id, "Accept failed: {e}"))
    }

    pub async fn reject_file(&self, file_id: &str) -> PeerResult<()> {
        self.answer_reject(file_id)
            .await
            .inspect_err(|e| warn!(file_id, "Reject failed: {e}"))
    }

    pub fn pending_requests(&self) -> usize {
        self.core.transfers.pending_count()
    }

    pub async fn active_transfers(&self) -> usize {
        self.core.transfers.active_count().await
    }

    fn ensure_running(&self) -> PeerResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PeerError::NotRunning)
        }
    }

    fn target(&self, peer_id: &str) -> PeerResult<SocketAddr> {
        self.ensure_running()?;

        self.discovery
            .resolve(peer_id)
            .map(|peer| peer.socket_addr())
            .ok_or_else(|| PeerError::UnknownPeer(peer_id.to_string()))
    }

    async fn deliver_message(&self, peer_id: &str, text: &str) -> PeerResult<()> {
        let target = self.target(peer_id)?;
        self.messaging.send_message(target, text).await?;
        Ok(())
    }

    async fn offer_file(&self, peer_id: &str, path: &Path) -> PeerResult<String> {
        self.ensure_running()?;

        let filesize = match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(PeerError::FileNotFound(path.to_path_buf())),
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PeerError::FileNotFound(path.to_path_buf()))?;

        let target = self.target(peer_id)?;
        let file_id = Uuid::new_v4().to_string();

        self.core.transfers.insert_pending(TransferRequest {
            file_id: file_id.clone(),
            peer_id: peer_id.to_string(),
            target,
            file_path: path.to_path_buf(),
            filename: filename.clone(),
            filesize,
        });

        if let Err(e) = self
            .messaging
            .send_file_request(target, &file_id, &filename, filesize)
            .await
        {
            self.core.transfers.remove_pending(&file_id);
            return Err(e.into());
        }

        info!(peer = peer_id, file_id = %file_id, "📤 Offered {filename} ({filesize} bytes)");
        Ok(file_id)
    }


    /// Counterpart of a transfer that is still waiting for the user's answer.
    async fn requested_peer(&self, file_id: &str) -> PeerResult<String> {
        match self.core.transfers.status_of(file_id).await {
            None => Err(PeerError::UnknownTransfer(file_id.to_string())),
            Some((_, status)) if status != TransferStatus::Requested => {
                Err(PeerError::InvalidTransferState(file_id.to_string()))
            }
            Some((peer_id, _)) => Ok(peer_id),
        }
    }

    async fn answer_accept(&self, file_id: &str, save_path: &Path) -> PeerResult<()> {
        self.ensure_running()?;

        let peer_id = self.requested_peer(file_id).await?;
        let target = self.target(&peer_id)?;

        let file = match File::create(save_path).await {
            Ok(file) => file,
            Err(source) => {
                self.core.transfers.remove_active(file_id).await;
                return Err(PeerError::Destination {
                    path: save_path.to_path_buf(),
                    source,
                });
            }
        };
        if !self
            .core
            .transfers
            .attach_destination(file_id, file, target)
            .await
        {
            return Err(PeerError::InvalidTransferState(file_id.to_string()));
        }

        let save_path_str = save_path.to_string_lossy().into_owned();
        if let Err(e) = self
            .messaging
            .send_file_response(target, file_id, true, Some(save_path_str))
            .await
        {
            let _ = self.core.close_transfer(file_id, &peer_id, false).await;
            return Err(e.into());
        }

        info!(file_id, "📥 Accepted, saving to {}", save_path.display());
        Ok(())
    }

    async fn answer_reject(&self, file_id: &str) -> PeerResult<()> {
        self.ensure_running()?;

        let peer_id = self.requested_peer(file_id).await?;
        let target = self.target(&peer_id)?;

        self.messaging
            .send_file_response(target, file_id, false, None)
            .await?;

        // Kept on failure so the reject can be retried.
        self.core.transfers.remove_active(file_id).await;
        info!(file_id, "🚫 Rejected");
        Ok(())
    }
}

/// Inbound frame reactions, shared with the connection tasks.
struct PeerCore {
    sender: TcpSender,
    transfers: Arc<TransferManager>,
    events: EventSender,
}

impl PeerCore {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_stream(&self, request: TransferRequest) {
        let sender = self.sender.clone();
        let transfers = self.transfers.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = sender
                .send_file_chunks(request.target, &request.file_id, &request.file_path)
                .await;

            transfers.remove_active(&request.file_id).await;

            match result {
                Ok(total) => {
                    info!(file_id = %request.file_id, "📤 Sent {} in {total} chunks", request.filename)
                }
                Err(e) => {
                    let _ = events.send(PeerEvent::FileError {
                        from: request.peer_id,
                        file_id: request.file_id,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    /// Flushes and closes the save file, then drops the transfer entry.
    /// Returns the removed entry with the outcome of the final flush.
    async fn close_transfer(
        &self,
        file_id: &str,
        from: &str,
        complete: bool,
    ) -> Option<(ActiveTransfer, io::Result<()>)> {
        let flushed = match self
            .transfers
            .detach_destination(file_id, from, complete)
            .await
        {
            Some(destination) => close_destination(destination).await,
            None => Ok(()),
        };

        let transfer = self.transfers.take_active(file_id, from).await?;
        Some((transfer, flushed))
    }

    /// Drops a receiving transfer after a local failure and reports it.
    async fn fail_transfer(&self, from: String, file_id: String, error: String) {
        if self.close_transfer(&file_id, &from, false).await.is_none() {
            return;
        }

        warn!(from = %from, file_id = %file_id, "Transfer failed: {error}");
        self.emit(PeerEvent::FileError {
            from,
            file_id,
            error,
        });
    }
}

#[async_trait]
impl FrameHandler for PeerCore {
    async fn on_message_received(&self, from: String, message: String) {
        info!(from = %from, "💬 {message}");
        self.emit(PeerEvent::MessageReceived {
            from,
            text: message,
        });
    }

    async fn on_file_request(&self, from: String, file_id: String, filename: String, filesize: u64) {
        let transfer =
            ActiveTransfer::incoming(file_id.clone(), from.clone(), filename.clone(), filesize);

        if !self.transfers.insert_active(transfer).await {
            warn!(from = %from, file_id = %file_id, "Duplicate file request ignored");
            return;
        }

        self.emit(PeerEvent::FileRequest {
            from,
            file_id,
            filename,
            filesize,
        });
    }

    async fn on_file_response(
        &self,
        from: String,
        file_id: String,
        accepted: bool,
        save_path: Option<String>,
    ) {
        let Some(request) = self.transfers.take_pending(&file_id, &from) else {
            debug!(from = %from, file_id = %file_id, "Response for unknown request ignored");
            return;
        };

        self.emit(PeerEvent::FileResponse {
            from: from.clone(),
            file_id: file_id.clone(),
            accepted,
            save_path,
        });

        if !accepted {
            info!(from = %from, file_id = %file_id, "🚫 {} was rejected", request.filename);
            self.emit(PeerEvent::FileError {
                from,
                file_id,
                error: "rejected".to_string(),
            });
            return;
        }

        self.transfers
            .insert_active(ActiveTransfer::outgoing(request.clone()))
            .await;
        self.spawn_stream(request);
    }

    async fn on_file_chunk(&self, from: String, file_id: String, chunk_num: u64, data: Vec<u8>) {
        let Some(destination) = self.transfers.destination(&file_id, &from).await else {
            debug!(from = %from, file_id = %file_id, chunk_num, "Chunk for unknown or unaccepted transfer ignored");
            return;
        };

        let written = write_chunk(&destination, &data).await;
        drop(destination);

        if let Err(e) = written {
            self.fail_transfer(from, file_id, e.to_string()).await;
            return;
        }

        let Some((bytes_received, total_bytes)) = self
            .transfers
            .record_chunk(&file_id, chunk_num, data.len() as u64)
            .await
        else {
            return;
        };

        self.emit(PeerEvent::FileProgress {
            from,
            file_id,
            bytes_received,
            total_bytes,
        });
    }

    async fn on_file_complete(&self, from: String, file_id: String, total_chunks: u64) {
        if !self.transfers.is_receiving(&file_id, &from).await {
            debug!(file_id = %file_id, "Completion for unknown transfer ignored");
            return;
        }

        let Some((transfer, flushed)) = self.close_transfer(&file_id, &from, true).await else {
            return;
        };

        if let Err(e) = flushed {
            warn!(from = %from, file_id = %file_id, "Could not finish {}: {e}", transfer.filename);
            self.emit(PeerEvent::FileError {
                from,
                file_id,
                error: e.to_string(),
            });
            return;
        }

        let received = transfer.received_chunks.len() as u64;
        if received != total_chunks {
            warn!(file_id = %file_id, received, total_chunks, "Chunk count mismatch");
        }

        info!(from = %from, file_id = %file_id, "✅ Received {} ({} bytes)", transfer.filename, transfer.bytes_received);
        self.emit(PeerEvent::FileComplete {
            from,
            file_id,
            filename: transfer.filename,
        });
    }

    async fn on_file_error(&self, from: String, file_id: String, error: String) {
        let active = self.close_transfer(&file_id, &from, false).await;
        let pending = self.transfers.take_pending(&file_id, &from);

        if active.is_none() && pending.is_none() {
            debug!(file_id = %file_id, "Error for unknown transfer ignored");
            return;
        }

        warn!(from = %from, file_id = %file_id, "Transfer failed remotely: {error}");
        self.emit(PeerEvent::FileError {
            from,
            file_id,
            error,
        });
    }

    async fn on_stream_aborted(&self, from: String, file_id: String, reason: String) {
        if !self.transfers.is_receiving(&file_id, &from).await {
            return;
        }

        self.fail_transfer(from, file_id, format!("transfer interrupted: {reason}"))
            .await;
    }
}

/// Writes one chunk and flushes it, so a failed disk write surfaces here
/// rather than on a later operation.
async fn write_chunk(destination: &Destination, data: &[u8]) -> io::Result<()> {
    let mut file = destination.lock().await;
    file.write_all(data).await?;
    file.flush().await
}

async fn close_destination(destination: Destination) -> io::Result<()> {
    let mut file = destination.lock().await;
    file.flush().await
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
