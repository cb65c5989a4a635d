//! Length-prefixed framing of encoded messages over byte streams.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! an encoded [`Message`]. The same framing is used by command sessions and
//! by TCP channel links.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use nimo_core::{Message, Value};

use crate::error::FrameError;

/// Largest accepted frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Write timeout applied by [`write_value_timeout`].
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::TooLarge {
        size: bytes.len(),
        max: MAX_FRAME_SIZE,
    })?;
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. A clean EOF before the length prefix is `Closed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Encodes `value` as a message and writes it as one frame.
pub async fn write_value<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = Message::encode(value)?;
    write_frame(writer, &bytes).await
}

/// [`write_value`] bounded by [`WRITE_TIMEOUT`].
pub async fn write_value_timeout<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(WRITE_TIMEOUT, write_value(writer, value)).await {
        Ok(result) => result,
        Err(_) => Err(FrameError::WriteTimeout),
    }
}

/// Reads one frame and decodes the message inside it.
pub async fn read_value<R>(reader: &mut R) -> Result<Value, FrameError>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_frame(reader).await?;
    Message::decode(&bytes).ok_or(FrameError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_value_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let value = Value::array(["addNode", "node1"]);
        write_value(&mut a, &value).await.unwrap();
        assert_eq!(read_value(&mut b).await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_eof_is_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
        let err = read_value(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::Malformed));
    }
}
