use crate::{
    application::network::transport::interface::{TransportError, TransportResult},
    proto::{Frame, FrameKind, wire},
};
use std::{io::ErrorKind, net::SocketAddr, path::Path, time::Duration};
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TcpSender {
    local_id: String,
    control_timeout: Duration,
    file_timeout: Duration,
    chunk_size: usize,
}

impl TcpSender {
    pub fn new(
        local_id: String,
        control_timeout: Duration,
        file_timeout: Duration,
        chunk_size: usize,
    ) -> Self {
        Self {
            local_id,
            control_timeout,
            file_timeout,
            chunk_size: chunk_size.clamp(1, wire::MAX_CHUNK_SEGMENT),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub async fn send_message(&self, target: SocketAddr, message: &str) -> TransportResult<()> {
        self.send_control(
            target,
            FrameKind::TextMessage {
                message: message.to_string(),
            },
        )
        .await
    }

    pub async fn send_file_request(
        &self,
        target: SocketAddr,
        file_id: &str,
        filename: &str,
        filesize: u64,
    ) -> TransportResult<()> {
        self.send_control(
            target,
            FrameKind::FileRequest {
                file_id: file_id.to_string(),
                filename: filename.to_string(),
                filesize,
            },
        )
        .await
    }

    pub async fn send_file_response(
        &self,
        target: SocketAddr,
        file_id: &str,
        accepted: bool,
        save_path: Option<String>,
    ) -> TransportResult<()> {
        let file_id = file_id.to_string();
        let kind = if accepted {
            FrameKind::FileAccept { file_id, save_path }
        } else {
            FrameKind::FileReject { file_id }
        };

        self.send_control(target, kind).await
    }

    pub async fn send_file_error(
        &self,
        target: SocketAddr,
        file_id: &str,
        error: &str,
    ) -> TransportResult<()> {
        self.send_control(
            target,
            FrameKind::FileError {
                file_id: file_id.to_string(),
                error: error.to_string(),
            },
        )
        .await
    }

    /// Streams `path` to `target` over a single connection and returns the
    /// number of chunks sent. A failed stream is reported to the receiver with
    /// a best-effort `FILE_ERROR` on a fresh connection.
    pub async fn send_file_chunks(
        &self,
        target: SocketAddr,
        file_id: &str,
        path: &Path,
    ) -> TransportResult<u64> {
        match self.stream_file(target, file_id, path).await {
            Ok(total) => Ok(total),
            Err(e) => {
                warn!(target = ?target, file_id, "File stream failed: {e}");

                if let Err(notify_err) = self.send_file_error(target, file_id, &e.to_string()).await
                {
                    debug!(target = ?target, file_id, "Could not report stream failure: {notify_err}");
                }
                Err(e)
            }
        }
    }

    async fn stream_file(
        &self,
        target: SocketAddr,
        file_id: &str,
        path: &Path,
    ) -> TransportResult<u64> {
        let mut file = File::open(path).await?;
        let mut stream = self.connect(target, self.file_timeout).await?;

        info!(kind = "FILE_CHUNK", target = ?target, file_id, "[⬆️  SEND]");

        let mut buf = vec![0u8; self.chunk_size];
        let mut chunk_num = 0u64;

        loop {
            let n = read_block(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }

            let frame = Frame::new(
                self.local_id.as_str(),
                FrameKind::FileChunk {
                    file_id: file_id.to_string(),
                    chunk_num,
                },
            );
            with_timeout(
                self.file_timeout,
                target,
                wire::write_chunk(&mut stream, &frame, &buf[..n]),
            )
            .await?;

            chunk_num += 1;
        }

        let complete = Frame::new(
            self.local_id.as_str(),
            FrameKind::FileComplete {
                file_id: file_id.to_string(),
                total_chunks: chunk_num,
            },
        );
        with_timeout(self.file_timeout, target, async {
            wire::write_frame(&mut stream, &complete).await?;
            stream.shutdown().await?;
            Ok::<_, TransportError>(())
        })
        .await?;

        Ok(chunk_num)
    }

    async fn send_control(&self, target: SocketAddr, kind: FrameKind) -> TransportResult<()> {
        let frame = Frame::new(self.local_id.as_str(), kind);
        let bytes = wire::encode(&frame)?;

        info!(kind = %frame.kind, target = ?target, "[⬆️  SEND]");

        let mut stream = self.connect(target, self.control_timeout).await?;

        with_timeout(self.control_timeout, target, async {
            stream.write_all(&bytes).await?;
            stream.shutdown().await
        })
        .await
    }

    async fn connect(&self, addr: SocketAddr, limit: Duration) -> TransportResult<TcpStream> {
        with_timeout(limit, addr, TcpStream::connect(addr))
            .await
            .map_err(|e| match e {
                TransportError::Io(io_err) if io_err.kind() == ErrorKind::ConnectionRefused => {
                    TransportError::Refused { addr }
                }
                other => other,
            })
    }
}

async fn with_timeout<T, E, F>(limit: Duration, addr: SocketAddr, fut: F) -> TransportResult<T>
where
    F: Future<Output = Result<T, E>>,
    TransportError: From<E>,
{
    time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout { addr })?
        .map_err(TransportError::from)
}

/// Fills `buf` unless EOF comes first, so every chunk but the last is full.
async fn read_block(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
