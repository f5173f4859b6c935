use crate::{
    application::network::FrameHandler,
    proto::{Frame, FrameKind, WireResult, wire},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, time};
use tracing::{debug, info, warn};

/// Frame plus the raw segment that trails it, when it is a chunk.
struct Inbound {
    frame: Frame,
    segment: Option<Vec<u8>>,
}

pub struct TcpReceiver<H: FrameHandler> {
    handler: Arc<H>,
    read_timeout: Duration,
    max_frames: usize,
}

impl<H: FrameHandler> TcpReceiver<H> {
    pub fn new(handler: Arc<H>, read_timeout: Duration, max_frames: usize) -> Self {
        Self {
            handler,
            read_timeout,
            max_frames,
        }
    }

    /// Serves one accepted connection. Control frames close it after
    /// dispatch; chunk frames keep it open until a terminal frame, EOF or the
    /// frame cap. A chunk stream that ends without a terminal frame is
    /// reported through [`FrameHandler::on_stream_aborted`].
    pub async fn handle_connection(&self, mut stream: TcpStream, src_addr: SocketAddr) {
        let src_ip = src_addr.ip();
        // (from, file_id) of the chunk stream in progress.
        let mut streaming: Option<(String, String)> = None;

        let reason = 'serve: {
            for _ in 0..self.max_frames {
                let inbound = match time::timeout(self.read_timeout, read_inbound(&mut stream)).await {
                    Ok(Ok(Some(inbound))) => inbound,
                    Ok(Ok(None)) => break 'serve "connection closed mid-stream".to_string(),
                    Ok(Err(e)) => {
                        warn!(ip = ?src_ip, "Dropping connection: {e}");
                        break 'serve e.to_string();
                    }
                    Err(_) => {
                        warn!(ip = ?src_ip, "Connection idle for {:?}, closing", self.read_timeout);
                        break 'serve format!("idle for {:?}", self.read_timeout);
                    }
                };

                let terminal = inbound.frame.kind.is_terminal();
                if let FrameKind::FileChunk { file_id, .. } = &inbound.frame.kind {
                    streaming = Some((inbound.frame.from.clone(), file_id.clone()));
                }
                self.dispatch(inbound, src_addr).await;

                if terminal {
                    return;
                }
            }

            warn!(ip = ?src_ip, max = self.max_frames, "Frame limit reached, closing connection");
            format!("frame limit of {} reached", self.max_frames)
        };

        if let Some((from, file_id)) = streaming {
            self.handler.on_stream_aborted(from, file_id, reason).await;
        }
    }

    async fn dispatch(&self, inbound: Inbound, src_addr: SocketAddr) {
        let Frame { from, kind } = inbound.frame;

        match kind {
            FrameKind::FileChunk { .. } => {
                debug!(kind = %kind, from = %from, ip = ?src_addr.ip(), "[🔔 RECV]")
            }
            _ => info!(kind = %kind, from = %from, ip = ?src_addr.ip(), "[🔔 RECV]"),
        }

        match kind {
            FrameKind::TextMessage { message } => {
                self.handler.on_message_received(from, message).await
            }
            FrameKind::FileRequest {
                file_id,
                filename,
                filesize,
            } => {
                self.handler
                    .on_file_request(from, file_id, filename, filesize)
                    .await
            }
            FrameKind::FileAccept { file_id, save_path } => {
                self.handler
                    .on_file_response(from, file_id, true, save_path)
                    .await
            }
            FrameKind::FileReject { file_id } => {
                self.handler
                    .on_file_response(from, file_id, false, None)
                    .await
            }
            FrameKind::FileChunk { file_id, chunk_num } => {
                let data = inbound.segment.unwrap_or_default();
                self.handler
                    .on_file_chunk(from, file_id, chunk_num, data)
                    .await
            }
            FrameKind::FileComplete {
                file_id,
                total_chunks,
            } => {
                self.handler
                    .on_file_complete(from, file_id, total_chunks)
                    .await
            }
            FrameKind::FileError { file_id, error } => {
                self.handler.on_file_error(from, file_id, error).await
            }
            FrameKind::PeerDiscovery { .. } => {
                warn!(ip = ?src_addr.ip(), "Unexpected discovery frame over TCP, dropped")
            }
        }
    }
}

async fn read_inbound(stream: &mut TcpStream) -> WireResult<Option<Inbound>> {
    let Some(frame) = wire::read_frame(stream).await? else {
        return Ok(None);
    };

    let segment = match frame.kind {
        FrameKind::FileChunk { .. } => Some(wire::read_segment(stream).await?),
        _ => None,
    };

    Ok(Some(Inbound { frame, segment }))
}
