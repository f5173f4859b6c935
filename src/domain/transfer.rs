use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{fs::File, sync::Mutex};

/// Open save file of an accepted transfer. Shared so chunk writes happen
/// without holding the transfer map.
pub type Destination = Arc<Mutex<File>>;

/// An outgoing file offer waiting for the remote side to answer. It only
/// lives while unanswered; the response takes it out of the pending map.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub file_id: String,
    pub peer_id: String,
    pub target: SocketAddr,
    pub file_path: PathBuf,
    pub filename: String,
    pub filesize: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Requested,
    Accepted,
    Complete,
}

#[derive(Debug)]
pub struct ActiveTransfer {
    pub file_id: String,
    pub peer_id: String,
    /// Resolved when the transfer is answered; known up front for outgoing ones.
    pub target: Option<SocketAddr>,
    pub filename: String,
    pub filesize: u64,
    pub status: TransferStatus,
    pub destination: Option<Destination>,
    pub received_chunks: Vec<u64>,
    pub bytes_received: u64,
}

impl ActiveTransfer {
    pub fn incoming(file_id: String, peer_id: String, filename: String, filesize: u64) -> Self {
        Self {
            file_id,
            peer_id,
            target: None,
            filename,
            filesize,
            status: TransferStatus::Requested,
            destination: None,
            received_chunks: Vec::new(),
            bytes_received: 0,
        }
    }

    pub fn outgoing(request: TransferRequest) -> Self {
        Self {
            file_id: request.file_id,
            peer_id: request.peer_id,
            target: Some(request.target),
            filename: request.filename,
            filesize: request.filesize,
            status: TransferStatus::Accepted,
            destination: None,
            received_chunks: Vec::new(),
            bytes_received: 0,
        }
    }

    /// Accepted incoming transfer from `from`, with its save file open.
    pub fn is_receiving_from(&self, from: &str) -> bool {
        self.peer_id == from && self.destination.is_some()
    }
}
