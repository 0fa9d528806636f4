//! Length-prefixed framing for socket links.
//!
//! Each frame on a TCP link is a 4-byte big-endian length prefix followed by
//! the frame bytes. Frame boundaries are preserved end to end, so the layer
//! above sees exactly the byte sequences that were sent.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::traits::TransportError;

/// Default maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prefix `data` with its length, ready to be written to a link.
///
/// # Errors
///
/// Returns an error if the frame is larger than `max_frame_size`.
pub fn encode_frame(data: &[u8], max_frame_size: usize) -> Result<Bytes, TransportError> {
    if data.len() > max_frame_size || data.len() > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge {
            size: data.len(),
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + data.len());
    buf.put_u32(data.len() as u32);
    buf.extend_from_slice(data);

    Ok(buf.freeze())
}

/// Read one frame from a link.
///
/// Returns `Ok(None)` if the link closed cleanly on a frame boundary.
///
/// # Errors
///
/// Returns an error if the link fails mid-frame or the announced length
/// exceeds `max_frame_size`.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let length = match reader.read_u32().await {
        Ok(length) => length as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if length > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let mut buf = vec![0u8; length];
    reader.read_exact(&mut buf).await?;

    Ok(Some(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_keep_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        for data in [&b"first"[..], &b""[..], &b"third frame"[..]] {
            let frame = encode_frame(data, MAX_FRAME_SIZE).unwrap();
            client.write_all(&frame).await.unwrap();
        }
        drop(client);

        assert_eq!(read_frame(&mut server, MAX_FRAME_SIZE).await.unwrap().unwrap(), "first");
        assert_eq!(read_frame(&mut server, MAX_FRAME_SIZE).await.unwrap().unwrap(), "");
        assert_eq!(
            read_frame(&mut server, MAX_FRAME_SIZE).await.unwrap().unwrap(),
            "third frame"
        );
        assert!(read_frame(&mut server, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[test]
    fn test_encode_too_large() {
        match encode_frame(&[0u8; 9], 8) {
            Err(TransportError::FrameTooLarge { size: 9, max: 8 }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&1000u32.to_be_bytes()).await.unwrap();

        match read_frame(&mut server, 16).await {
            Err(TransportError::FrameTooLarge { size: 1000, max: 16 }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_truncated_body() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server, MAX_FRAME_SIZE).await,
            Err(TransportError::Io(_))
        ));
    }
}
