//! # Length-prefixed frame codec.
//!
//! Every control-plane message is a 4-byte big-endian unsigned length
//! followed by a UTF-8 JSON payload. Frames over 1 MiB are rejected
//! before any allocation; a rejected frame aborts its connection (the
//! stream offset can no longer be trusted).

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size in bytes (u32, big-endian).
pub const HEADER_SIZE: usize = 4;
/// Maximum accepted payload size.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Frame-level failures.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Declared length exceeds [`MAX_MESSAGE_SIZE`].
    #[error("message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge(usize),
    /// Underlying stream failure (including EOF mid-frame).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one frame; `Ok(None)` means the peer closed cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
