use crate::proto::WireError;
use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io;

/// Receives every frame accepted by the messaging service, already decoded
/// and validated. Implementations run on the connection's own task.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_message_received(&self, from: String, message: String);

    async fn on_file_request(&self, from: String, file_id: String, filename: String, filesize: u64);

    async fn on_file_response(
        &self,
        from: String,
        file_id: String,
        accepted: bool,
        save_path: Option<String>,
    );

    async fn on_file_chunk(&self, from: String, file_id: String, chunk_num: u64, data: Vec<u8>);

    async fn on_file_complete(&self, from: String, file_id: String, total_chunks: u64);

    async fn on_file_error(&self, from: String, file_id: String, error: String);

    /// A chunk stream ended without `FILE_COMPLETE` or `FILE_ERROR`: the
    /// sender hung up, went idle, sent garbage or hit the frame cap.
    async fn on_stream_aborted(&self, from: String, file_id: String, reason: String);
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out talking to {addr}")]
    Timeout { addr: SocketAddr },

    #[error("connection refused by {addr}")]
    Refused { addr: SocketAddr },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Io(e) => e.kind(),
            TransportError::Timeout { .. } => io::ErrorKind::TimedOut,
            TransportError::Refused { .. } => io::ErrorKind::ConnectionRefused,
            TransportError::Wire(_) => io::ErrorKind::InvalidData,
        };

        match err {
            TransportError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}
