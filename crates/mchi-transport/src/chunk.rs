use bytes::{BufMut, BytesMut};

use crate::error::{Result, TransportError};
use crate::magic::SESSION_MAGIC;

/// Chunk header: magic (4) + size (2) = 6 bytes.
pub const CHUNK_HEADER_SIZE: usize = 6;

/// Every chunk occupies a multiple of this many bytes in the ring.
pub const CHUNK_ALIGN: usize = 0x20;

/// Largest payload a single chunk can declare.
pub const MAX_CHUNK_PAYLOAD: usize = u16::MAX as usize;

/// Ring bytes taken by a chunk carrying `payload_len` bytes.
pub const fn chunk_wire_size(payload_len: usize) -> usize {
    (payload_len + CHUNK_HEADER_SIZE + CHUNK_ALIGN - 1) & !(CHUNK_ALIGN - 1)
}

/// Encode one chunk, zero-padded to the chunk alignment.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────────┬──────────────┐
/// │ Magic (4B)   │ Size      │ Payload          │ Zero padding │
/// │ "MCHI"       │ (2B BE)   │ (Size bytes)     │ to 32 bytes  │
/// └──────────────┴───────────┴──────────────────┴──────────────┘
/// ```
///
/// Returns the number of bytes appended to `dst`.
pub fn encode_chunk(payload: &[u8], dst: &mut BytesMut) -> Result<usize> {
    if payload.len() > MAX_CHUNK_PAYLOAD {
        return Err(TransportError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_CHUNK_PAYLOAD,
        });
    }
    let total = chunk_wire_size(payload.len());
    dst.reserve(total);
    dst.put_slice(SESSION_MAGIC.as_bytes());
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    dst.put_bytes(0, total - CHUNK_HEADER_SIZE - payload.len());
    Ok(total)
}

/// Decode every chunk in a drained ring run, appending payloads to `dst`.
///
/// The run must consist of whole chunks; the writer only ever publishes its
/// cursor on a chunk boundary. Returns the number of payload bytes appended.
pub fn decode_chunks(mut src: &[u8], dst: &mut BytesMut) -> Result<usize> {
    let mut offset = 0;
    let mut appended = 0;

    while !src.is_empty() {
        if src.len() < CHUNK_HEADER_SIZE {
            return Err(TransportError::TruncatedChunk {
                offset,
                declared: CHUNK_HEADER_SIZE,
                available: src.len(),
            });
        }
        if src[..4] != *SESSION_MAGIC.as_bytes() {
            return Err(TransportError::InvalidChunkMagic { offset });
        }

        let size = u16::from_be_bytes([src[4], src[5]]) as usize;
        let body = &src[CHUNK_HEADER_SIZE..];
        if body.len() < size {
            return Err(TransportError::TruncatedChunk {
                offset,
                declared: size,
                available: body.len(),
            });
        }
        dst.extend_from_slice(&body[..size]);
        appended += size;

        // Tolerate a final chunk whose padding runs past the drained bytes.
        let step = chunk_wire_size(size).min(src.len());
        src = &src[step..];
        offset += step;
    }

    Ok(appended)
}
