use std::net::IpAddr;
use tokio::sync::mpsc::UnboundedSender;

/// Everything a presentation layer gets told about. Delivered in order on the
/// receiver returned by [`crate::Peer::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    PeerDiscovered {
        peer_id: String,
        address: IpAddr,
        port: u16,
    },
    MessageReceived {
        from: String,
        text: String,
    },
    FileRequest {
        from: String,
        file_id: String,
        filename: String,
        filesize: u64,
    },
    FileResponse {
        from: String,
        file_id: String,
        accepted: bool,
        save_path: Option<String>,
    },
    FileProgress {
        from: String,
        file_id: String,
        bytes_received: u64,
        total_bytes: u64,
    },
    FileComplete {
        from: String,
        file_id: String,
        filename: String,
    },
    FileError {
        from: String,
        file_id: String,
        error: String,
    },
}

pub type EventSender = UnboundedSender<PeerEvent>;
