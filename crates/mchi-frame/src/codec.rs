use bytes::{Buf, BufMut, Bytes, BytesMut};
use mchi_transport::Magic;

use crate::error::{FrameError, Result};

/// Tag header: magic (4) + length (4) = 8 bytes.
pub const TAG_HEADER_SIZE: usize = 8;

/// Default maximum tag payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A reassembled message for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The subsystem this message belongs to.
    pub magic: Magic,
    /// The message payload.
    pub payload: Bytes,
}

impl Tag {
    pub fn new(magic: Magic, payload: impl Into<Bytes>) -> Self {
        Self {
            magic,
            payload: payload.into(),
        }
    }

    /// The total stream size of this tag (header + payload).
    pub fn wire_size(&self) -> usize {
        TAG_HEADER_SIZE + self.payload.len()
    }
}

/// Encode a tag into the stream format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬─────────────────┐
/// │ Magic (4B)   │ Length    │ Payload         │
/// │ e.g. "ORef"  │ (4B BE)   │ (Length bytes)  │
/// └──────────────┴───────────┴─────────────────┘
/// ```
pub fn encode_tag(magic: Magic, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(TAG_HEADER_SIZE + payload.len());
    dst.put_slice(magic.as_bytes());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a tag from the front of the receive buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete tag yet.
/// On success, consumes the tag bytes from the buffer.
pub fn decode_tag(src: &mut BytesMut, max_payload: usize) -> Result<Option<Tag>> {
    if src.len() < TAG_HEADER_SIZE {
        return Ok(None);
    }

    let magic = Magic::new([src[0], src[1], src[2], src[3]]);
    let payload_len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = TAG_HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(TAG_HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Tag { magic, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OREF: Magic = Magic::new(*b"ORef");

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_tag(OREF, b"\x00\x00\x00\x02", &mut buf).unwrap();
        assert_eq!(&buf[..8], b"ORef\x00\x00\x00\x04");

        let tag = decode_tag(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(tag.magic, OREF);
        assert_eq!(tag.payload.as_ref(), b"\x00\x00\x00\x02");
        assert_eq!(tag.wire_size(), 12);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_needs_more_data() {
        for len in 0..TAG_HEADER_SIZE {
            let mut buf = BytesMut::from(&b"ORef\x00\x00\x00\x00"[..len]);
            assert!(decode_tag(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
            assert_eq!(buf.len(), len);
        }
    }

    #[test]
    fn incomplete_payload_needs_more_data() {
        let mut buf = BytesMut::new();
        encode_tag(OREF, b"hello", &mut buf).unwrap();
        let full = buf.clone();

        for len in TAG_HEADER_SIZE..full.len() {
            let mut partial = BytesMut::from(&full[..len]);
            assert!(decode_tag(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
            assert_eq!(partial.len(), len, "partial tag must stay buffered");
        }
    }

    #[test]
    fn rejects_payload_above_limit() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"ORef");
        buf.put_u32(64);

        assert!(matches!(
            decode_tag(&mut buf, 32),
            Err(FrameError::PayloadTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn back_to_back_tags() {
        let mut buf = BytesMut::new();
        encode_tag(OREF, b"first", &mut buf).unwrap();
        encode_tag(Magic::new(*b"JHIx"), b"", &mut buf).unwrap();
        buf.put_slice(b"ORe");

        let t1 = decode_tag(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(t1.payload.as_ref(), b"first");
        let t2 = decode_tag(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(t2.magic, Magic::new(*b"JHIx"));
        assert!(t2.payload.is_empty());
        assert!(decode_tag(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(&buf[..], b"ORe");
    }
}
