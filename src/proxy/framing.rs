//! DNS over TCP framing. Every message is prefixed with its length as a
//! 2 byte big-endian integer (RFC 1035 4.2.2).

use tokio::io::{AsyncRead, AsyncReadExt};

use super::client_session::{ProtocolError, TransportError};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Reads one length-prefixed message.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_full(reader, &mut prefix).await?;
    let length = u16::from_be_bytes(prefix) as usize;

    let mut payload = vec![0u8; length];
    read_full(reader, &mut payload).await?;
    Ok(payload)
}

/// Fills `buffer` completely. A closed stream before that is an incomplete message.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> Result<(), TransportError> {
    let mut received = 0;
    while received < buffer.len() {
        let read = reader.read(&mut buffer[received..]).await?;
        if read == 0 {
            return Err(TransportError::Incomplete {
                expected: buffer.len(),
                received,
            });
        }
        received += read;
    }
    Ok(())
}

/// Prefixes the payload with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = u16::try_from(payload.len()).map_err(|_| ProtocolError::Oversized(payload.len()))?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}
