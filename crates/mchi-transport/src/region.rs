use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Result, TransportError};

/// A block of memory shared with the target.
///
/// Implementations copy bytes in and out at absolute offsets. Both ends poll
/// the same block, so readers must never cache contents between calls.
pub trait SharedRegion {
    /// Total size of the region in bytes.
    fn len(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` out of the region.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into the region starting at `offset`.
    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a target is currently attached to the region.
    fn is_attached(&self) -> bool {
        true
    }

    /// Counter bumped whenever the target re-attaches from scratch.
    fn generation(&self) -> u64 {
        0
    }

    /// Read a big-endian `u32`.
    fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_bytes(offset, &mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    /// Write a big-endian `u32`.
    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_bytes(offset, &value.to_be_bytes())
    }
}

impl<R: SharedRegion + ?Sized> SharedRegion for Box<R> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        (**self).read_bytes(offset, dst)
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        (**self).write_bytes(offset, src)
    }

    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }

    fn generation(&self) -> u64 {
        (**self).generation()
    }
}

pub(crate) fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(TransportError::OutOfBounds { offset, len, size }),
    }
}

/// In-process region.
///
/// Clones share the same buffer, so one handle can play the controller while
/// another plays the target.
#[derive(Clone, Debug)]
pub struct LocalRegion {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LocalRegion {
    /// Create a zero-filled region of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    /// Copy of the whole region.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SharedRegion for LocalRegion {
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let buf = self.lock();
        check_bounds(offset, dst.len(), buf.len())?;
        dst.copy_from_slice(&buf[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let mut buf = self.lock();
        check_bounds(offset, src.len(), buf.len())?;
        buf[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_contents() {
        let mut a = LocalRegion::new(64);
        let b = a.clone();

        a.write_u32(0x20, 0x0000_0060).unwrap();
        assert_eq!(b.read_u32(0x20).unwrap(), 0x60);
        assert_eq!(&b.snapshot()[0x20..0x24], &[0x00, 0x00, 0x00, 0x60]);
    }

    #[test]
    fn rejects_out_of_bounds_access() {
        let mut region = LocalRegion::new(16);
        let mut dst = [0u8; 4];

        assert!(matches!(
            region.read_bytes(14, &mut dst),
            Err(TransportError::OutOfBounds { offset: 14, len: 4, size: 16 })
        ));
        assert!(region.write_bytes(usize::MAX, &[1]).is_err());
        assert!(region.write_bytes(12, &[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn boxed_region_forwards() {
        let inner = LocalRegion::new(8);
        let mut boxed: Box<dyn SharedRegion> = Box::new(inner.clone());

        boxed.write_bytes(0, b"MCHI").unwrap();
        assert_eq!(boxed.len(), 8);
        assert!(boxed.is_attached());
        assert_eq!(&inner.snapshot()[..4], b"MCHI");
    }
}
