//! Big-endian field readers and writers for tag payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mchi_transport::Magic;

use crate::error::{FrameError, Result};
use crate::sjis;

/// Bounds-checked reader over a tag payload.
///
/// Every read checks the remaining length first, so a short payload surfaces
/// as [`FrameError::UnexpectedEof`] instead of a panic.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            len: buf.len(),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.len - self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            Err(FrameError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_magic(&mut self) -> Result<Magic> {
        let bytes = self.read_bytes(4)?;
        Ok(Magic::new([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Borrow the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a `u16`-length-prefixed Shift-JIS string.
    pub fn read_sjis(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(sjis::decode(bytes).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }
}

/// Growable big-endian payload builder.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16(v);
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.buf.put_i16(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32(v);
        self
    }

    pub fn put_f32(&mut self, v: f32) -> &mut Self {
        self.buf.put_f32(v);
        self
    }

    pub fn put_magic(&mut self, magic: Magic) -> &mut Self {
        self.buf.put_slice(magic.as_bytes());
        self
    }

    pub fn put_slice(&mut self, src: &[u8]) -> &mut Self {
        self.buf.put_slice(src);
        self
    }

    /// Write a `u16`-length-prefixed Shift-JIS string.
    pub fn put_sjis(&mut self, text: &str) -> Result<&mut Self> {
        let bytes = sjis::encode(text);
        let len = u16::try_from(bytes.len()).map_err(|_| FrameError::StringTooLong {
            len: bytes.len(),
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(&bytes);
        Ok(self)
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_fields() {
        let wire = [
            0x12, 0x34, // u16
            0xFF, 0xFE, // i16
            0xDE, 0xAD, 0xBE, 0xEF, // u32
            0x3F, 0x80, 0x00, 0x00, // f32 1.0
            b'O', b'R', b'e', b'f',
        ];
        let mut r = ByteReader::new(&wire);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_f32().unwrap(), 1.0);
        assert_eq!(r.read_magic().unwrap(), Magic::new(*b"ORef"));
        assert!(r.is_empty());
        assert_eq!(r.position(), wire.len());
    }

    #[test]
    fn short_reads_fail_without_consuming() {
        let mut r = ByteReader::new(&[0x00, 0x01, 0x02]);
        assert!(matches!(
            r.read_u32(),
            Err(FrameError::UnexpectedEof {
                needed: 4,
                remaining: 3
            })
        ));
        assert_eq!(r.remaining(), 3);
        assert_eq!(r.read_u16().unwrap(), 1);
    }

    #[test]
    fn sjis_string_roundtrip() {
        let mut w = ByteWriter::new();
        w.put_sjis("カメラ").unwrap().put_u32(7);
        let bytes = w.freeze();
        assert_eq!(&bytes[..2], &[0x00, 0x06]);

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_sjis().unwrap(), "カメラ");
        assert_eq!(r.read_u32().unwrap(), 7);
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut r = ByteReader::new(&[0x00, 0x05, b'a', b'b']);
        assert!(matches!(
            r.read_sjis(),
            Err(FrameError::UnexpectedEof {
                needed: 5,
                remaining: 2
            })
        ));
    }

    #[test]
    fn rejects_oversized_string() {
        let long = "a".repeat(u16::MAX as usize + 1);
        let mut w = ByteWriter::new();
        assert!(matches!(
            w.put_sjis(&long),
            Err(FrameError::StringTooLong { .. })
        ));
        assert!(w.is_empty());
    }
}
