//! Wire framing.
//!
//! ```text
//! ┌──────────────┬─────────────────────────────┐
//! │ len: u32 BE  │ bincode(Envelope), len bytes │
//! └──────────────┴─────────────────────────────┘
//! ```

use shared_types::{ConversationError, Envelope, ProtocolError, SpaceError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default frame limit.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Length prefix size.
pub const FRAME_HEADER_LEN: usize = 4;

/// Serialize `envelope` into one frame.
pub fn encode_frame(envelope: &Envelope, max_frame: usize) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(envelope).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if body.len() > max_frame {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: max_frame,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: body.len(),
        max: max_frame,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (without its length prefix).
pub fn decode_body(body: &[u8]) -> Result<Envelope, ProtocolError> {
    bincode::deserialize(body).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
    max_frame: usize,
) -> Result<(), SpaceError> {
    let frame = encode_frame(envelope, max_frame)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| ConversationError::ConnectionClosed(e.to_string()))?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame: usize,
) -> Result<Option<Envelope>, SpaceError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ConversationError::ConnectionClosed(e.to_string()).into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_frame,
        }
        .into());
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ConversationError::ConnectionClosed(e.to_string()))?;
    Ok(Some(decode_body(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{
        ActivityId, MemoryRecord, NetworkAddress, NodeRole, Request, Transaction, MPO,
    };
    use uuid::Uuid;

    fn release(records: usize) -> Envelope {
        let target = MPO::new(0, 1, 3);
        Envelope::request(
            ActivityId::new(Uuid::new_v4(), 7),
            NodeRole::Leaf,
            0,
            Request::ReleaseLock {
                requester: MPO::new(0, 1, 2),
                target,
                cycle: 4,
                transaction: Transaction {
                    source: MPO::new(0, 1, 2),
                    cycle: 4,
                    records: (0..records)
                        .map(|i| MemoryRecord {
                            address: NetworkAddress::make_root(target),
                            data: vec![i as u8; 8],
                        })
                        .collect(),
                },
            },
        )
    }

    #[tokio::test]
    async fn test_frames_survive_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let first = release(1);
        let second = release(3);
        write_frame(&mut client, &first, DEFAULT_MAX_FRAME).await.unwrap();
        write_frame(&mut client, &second, DEFAULT_MAX_FRAME).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, DEFAULT_MAX_FRAME).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut server, DEFAULT_MAX_FRAME).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut server, DEFAULT_MAX_FRAME).await.unwrap(), None);
    }

    #[test]
    fn test_encode_respects_limit() {
        let err = encode_frame(&release(100), 64).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(1u32 << 30).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_garbage_body_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();
        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, SpaceError::Protocol(ProtocolError::Decode(_))));
    }
}
