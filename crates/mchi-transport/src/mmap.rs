use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::region::{check_bounds, SharedRegion};

/// A file-backed region mapped `MAP_SHARED` into this process.
///
/// The target (or the emulator hosting it) maps the same file, so every store
/// made here is visible to it without further signalling.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    path: PathBuf,
}

// SAFETY: the mapping is owned exclusively by this value and only accessed
// through `&self`/`&mut self` byte copies.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Map an existing shared-memory file read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| TransportError::Open {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len() as usize;
        if len == 0 {
            return Err(open_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "shared region is empty",
            )));
        }

        // SAFETY: `file` is an open descriptor with read/write access and `len`
        // is its current size; the kernel picks the address.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(open_err(std::io::Error::last_os_error()));
        }
        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| open_err(std::io::Error::other("mmap returned null")))?;

        debug!(?path, len, "mapped shared region");
        Ok(Self { ptr, len, path })
    }

    /// The file backing this mapping.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SharedRegion for MappedRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_bounds(offset, dst.len(), self.len)?;
        fence(Ordering::Acquire);
        // SAFETY: bounds checked above; the mapping stays valid for `self`'s
        // lifetime and `dst` cannot alias it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        check_bounds(offset, src.len(), self.len)?;
        // SAFETY: bounds checked above; `src` is a separate allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.ptr.as_ptr().add(offset),
                src.len(),
            );
        }
        fence(Ordering::Release);
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping created in `open`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len) };
        if rc != 0 {
            debug!(path = ?self.path, "munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(tag: &str, len: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mchi-mmap-{tag}-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[test]
    fn two_mappings_see_each_other() {
        let path = temp_file("shared", 0x100);

        let mut a = MappedRegion::open(&path).unwrap();
        let b = MappedRegion::open(&path).unwrap();
        assert_eq!(a.len(), 0x100);

        a.write_bytes(0x10, b"MCHI").unwrap();
        let mut magic = [0u8; 4];
        b.read_bytes(0x10, &mut magic).unwrap();
        assert_eq!(&magic, b"MCHI");

        drop(a);
        drop(b);
        assert_eq!(&std::fs::read(&path).unwrap()[0x10..0x14], b"MCHI");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_missing_and_empty_files() {
        let missing = std::env::temp_dir().join("mchi-mmap-does-not-exist");
        assert!(matches!(
            MappedRegion::open(&missing),
            Err(TransportError::Open { .. })
        ));

        let empty = temp_file("empty", 0);
        assert!(matches!(
            MappedRegion::open(&empty),
            Err(TransportError::Open { .. })
        ));
        let _ = std::fs::remove_file(&empty);
    }

    #[test]
    fn bounds_are_enforced() {
        let path = temp_file("bounds", 0x20);
        let mut region = MappedRegion::open(&path).unwrap();

        assert!(region.write_bytes(0x1E, &[1, 2, 3]).is_err());
        assert!(region.read_u32(0x1C).is_ok());
        let _ = std::fs::remove_file(&path);
    }
}
