use serde::{Deserialize, Serialize};

/// One typed wire message. Serialized as a flat JSON object carrying `type`,
/// `from` and the type-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub from: String,
    #[serde(flatten)]
    pub kind: FrameKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    TextMessage {
        message: String,
    },
    FileRequest {
        file_id: String,
        filename: String,
        filesize: u64,
    },
    FileAccept {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_path: Option<String>,
    },
    FileReject {
        file_id: String,
    },
    /// Always followed on the wire by a raw length-prefixed segment.
    FileChunk {
        file_id: String,
        chunk_num: u64,
    },
    FileComplete {
        file_id: String,
        total_chunks: u64,
    },
    FileError {
        file_id: String,
        error: String,
    },
    PeerDiscovery {
        peer_id: String,
        port: u16,
    },
}

impl Frame {
    pub fn new(from: impl Into<String>, kind: FrameKind) -> Self {
        Self {
            from: from.into(),
            kind,
        }
    }
}

impl FrameKind {
    /// A terminal frame ends the connection it arrived on. Only chunk frames
    /// keep a connection open for more frames.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::FileChunk { .. })
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TextMessage { .. } => f.write_str("TEXT_MESSAGE"),
            Self::FileRequest { .. } => f.write_str("FILE_REQUEST"),
            Self::FileAccept { .. } => f.write_str("FILE_ACCEPT"),
            Self::FileReject { .. } => f.write_str("FILE_REJECT"),
            Self::FileChunk { .. } => f.write_str("FILE_CHUNK"),
            Self::FileComplete { .. } => f.write_str("FILE_COMPLETE"),
            Self::FileError { .. } => f.write_str("FILE_ERROR"),
            Self::PeerDiscovery { .. } => f.write_str("PEER_DISCOVERY"),
        }
    }
}
