//! Framing: 4-byte big-endian length prefix + JSON payload.
//!
//! A chunk frame is two segments back to back: the descriptor frame and the
//! raw chunk bytes, each with its own length prefix.

use crate::proto::frame::Frame;
use std::io::{self, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LEN_PREFIX: usize = 4;

/// Largest accepted JSON payload for a control frame.
pub const MAX_CONTROL_FRAME: usize = 4096;

/// Largest accepted raw chunk segment.
pub const MAX_CHUNK_SEGMENT: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("frame too large: {size} bytes (max: {max})")]
    Oversized { size: usize, max: usize },
}

pub type WireResult<T> = Result<T, WireError>;

pub fn encode(frame: &Frame) -> WireResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(frame).map_err(|e| WireError::MalformedFrame(e.to_string()))?;
    check_len(payload.len(), MAX_CONTROL_FRAME)?;
    Ok(encode_segment(&payload))
}

pub fn encode_segment(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

pub fn encode_chunk(frame: &Frame, data: &[u8]) -> WireResult<Vec<u8>> {
    let mut out = encode(frame)?;
    out.extend_from_slice(&encode_segment(data));
    Ok(out)
}

/// Decodes one control frame from the front of `bytes`. Bytes past the
/// declared length are ignored.
pub fn decode(bytes: &[u8]) -> WireResult<Frame> {
    if bytes.len() < LEN_PREFIX {
        return Err(WireError::MalformedFrame(format!(
            "truncated length prefix ({} bytes)",
            bytes.len()
        )));
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    check_len(len, MAX_CONTROL_FRAME)?;

    let payload = bytes.get(LEN_PREFIX..LEN_PREFIX + len).ok_or_else(|| {
        WireError::MalformedFrame(format!(
            "payload is {} bytes, declared {len}",
            bytes.len() - LEN_PREFIX
        ))
    })?;

    parse(payload)
}

/// Reads one control frame. Returns `None` when the peer closed the
/// connection before sending any byte of a new frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> WireResult<Option<Frame>> {
    let mut len_buf = [0u8; LEN_PREFIX];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < LEN_PREFIX {
        reader
            .read_exact(&mut len_buf[n..])
            .await
            .map_err(truncated)?;
    }

    // Checked before the payload is allocated.
    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len, MAX_CONTROL_FRAME)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(truncated)?;

    parse(&payload).map(Some)
}

/// Reads the raw segment that trails a chunk frame.
pub async fn read_segment<R: AsyncRead + Unpin>(reader: &mut R) -> WireResult<Vec<u8>> {
    let mut len_buf = [0u8; LEN_PREFIX];
    reader.read_exact(&mut len_buf).await.map_err(truncated)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len, MAX_CHUNK_SEGMENT)?;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(truncated)?;
    Ok(data)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> WireResult<()> {
    let bytes = encode(frame)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

pub async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    data: &[u8],
) -> WireResult<()> {
    let bytes = encode_chunk(frame, data)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

fn parse(payload: &[u8]) -> WireResult<Frame> {
    serde_json::from_slice(payload).map_err(|e| WireError::MalformedFrame(e.to_string()))
}

fn check_len(size: usize, max: usize) -> WireResult<()> {
    if size > max {
        return Err(WireError::Oversized { size, max });
    }
    Ok(())
}

fn truncated(err: io::Error) -> WireError {
    if err.kind() == ErrorKind::UnexpectedEof {
        WireError::MalformedFrame("connection closed mid-frame".to_string())
    } else {
        WireError::Io(err)
    }
}
