//! # Wire Envelope
//!
//! Fixed 76-byte response header and the length-prefixed request frame.
//!
//! ```text
//! offset 0  : u32 payload_len            (little endian)
//! offset 4  : u32 responder_height
//! offset 8  : u32 responder_checkpoint_height
//! offset 12 : [u8; 32] latest_block_hash
//! offset 44 : [u8; 32] checkpoint_hash
//! offset 76 : payload[byte_offset..]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::{ChainSyncError, Hash, ResponseHeader, SyncRequest, RESPONSE_HEADER_SIZE};

/// Largest request frame accepted by a responder.
pub const MAX_REQUEST_FRAME: u32 = 4 * 1024;

/// Serialize a response header.
pub fn encode_header(header: &ResponseHeader) -> [u8; RESPONSE_HEADER_SIZE] {
    let mut out = [0u8; RESPONSE_HEADER_SIZE];
    out[0..4].copy_from_slice(&header.payload_len.to_le_bytes());
    out[4..8].copy_from_slice(&header.current_height.to_le_bytes());
    out[8..12].copy_from_slice(&header.checkpoint_height.to_le_bytes());
    out[12..44].copy_from_slice(&header.latest_block_hash);
    out[44..76].copy_from_slice(&header.checkpoint_hash);
    out
}

/// Parse a response header; anything shorter than the header is a protocol
/// violation.
pub fn decode_header(bytes: &[u8]) -> Result<ResponseHeader, ChainSyncError> {
    if bytes.len() < RESPONSE_HEADER_SIZE {
        return Err(ChainSyncError::ProtocolViolation(format!(
            "Response of {} bytes is smaller than the {} byte header",
            bytes.len(),
            RESPONSE_HEADER_SIZE
        )));
    }
    Ok(ResponseHeader {
        payload_len: read_u32(&bytes[0..4]),
        current_height: read_u32(&bytes[4..8]),
        checkpoint_height: read_u32(&bytes[8..12]),
        latest_block_hash: read_hash(&bytes[12..44]),
        checkpoint_hash: read_hash(&bytes[44..76]),
    })
}

/// Frame a request: `u32 len | bincode(request)`.
pub fn encode_request(request: &SyncRequest) -> Result<Vec<u8>, ChainSyncError> {
    let body = bincode::serialize(request)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one framed request from a stream.
pub async fn read_request<R>(reader: &mut R) -> Result<SyncRequest, ChainSyncError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_le_bytes(len);
    if len > MAX_REQUEST_FRAME {
        return Err(ChainSyncError::ProtocolViolation(format!(
            "Request frame of {} bytes exceeds {}",
            len, MAX_REQUEST_FRAME
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_hash(bytes: &[u8]) -> Hash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    hash
}
