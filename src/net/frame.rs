//! Length-prefixed framing
//!
//! Every message travels as `[LEN: u64 big-endian][PAYLOAD: LEN bytes]`.
//! A zero length is an error, not an empty message.

use crate::common::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame header
pub const HEADER_LEN: usize = 8;

/// Default ceiling on a single payload
pub const DEFAULT_MAX_FRAME: u64 = 64 * 1024 * 1024;

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(Error::EmptyFrame);
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u64(payload.len() as u64);
    frame.put_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame within `deadline`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// header. EOF inside a frame is a protocol error.
pub async fn read_frame<R>(reader: &mut R, deadline: Duration, max_len: u64) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(deadline, read_frame_inner(reader, max_len)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "no complete frame within {:?}",
            deadline
        ))),
    }
}

async fn read_frame_inner<R>(reader: &mut R, max_len: u64) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Protocol(format!(
                "stream closed after {} of {} header bytes",
                filled, HEADER_LEN
            )));
        }
        filled += n;
    }

    let len = u64::from_be_bytes(header);
    if len == 0 {
        return Err(Error::EmptyFrame);
    }
    if len > max_len {
        return Err(Error::FrameTooLarge {
            size: len,
            limit: max_len,
        });
    }

    let mut payload = BytesMut::zeroed(len as usize);
    if let Err(e) = reader.read_exact(&mut payload).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::Protocol(format!(
                "stream closed inside a {} byte frame",
                len
            )));
        }
        return Err(e.into());
    }

    Ok(Some(payload.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u64).to_be_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn test_write_frame_layout() {
        let mut out = Vec::new();
        write_frame(&mut out, b"hello").await.unwrap();
        assert_eq!(out, frame(b"hello"));
        assert!(matches!(write_frame(&mut out, b"").await, Err(Error::EmptyFrame)));
    }

    #[tokio::test]
    async fn test_read_frame_reassembles_three_byte_chunks() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let bytes = frame(&payload);

        let mut builder = Builder::new();
        for chunk in bytes.chunks(3) {
            builder.read(chunk);
        }
        let mut reader = builder.build();

        let got = read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], &payload[..]);
        assert!(read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_read_two_frames_back_to_back() {
        let mut bytes = frame(b"one");
        bytes.extend(frame(b"two"));
        let mut reader = &bytes[..];

        let a = read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME).await.unwrap();
        let b = read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME).await.unwrap();
        assert_eq!(a.as_deref(), Some(&b"one"[..]));
        assert_eq!(b.as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn test_zero_length_is_error() {
        let mut reader = Builder::new().read(&0u64.to_be_bytes()).build();
        assert!(matches!(
            read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME).await,
            Err(Error::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut reader = Builder::new().read(&1025u64.to_be_bytes()).build();
        assert!(matches!(
            read_frame(&mut reader, DEADLINE, 1024).await,
            Err(Error::FrameTooLarge { size: 1025, limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_frame() {
        let mut bytes = 10u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut reader = &bytes[..];
        assert!(matches!(
            read_frame(&mut reader, DEADLINE, DEFAULT_MAX_FRAME).await,
            Err(Error::Protocol(_))
        ));

        let mut partial_header = &[0u8, 0, 0][..];
        assert!(matches!(
            read_frame(&mut partial_header, DEADLINE, DEFAULT_MAX_FRAME).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let mut reader = Builder::new()
            .read(&5u64.to_be_bytes())
            .wait(Duration::from_secs(5))
            .build();

        let result = read_frame(&mut reader, Duration::from_millis(100), DEFAULT_MAX_FRAME).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
