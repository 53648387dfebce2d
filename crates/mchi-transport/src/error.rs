use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in shared-memory transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open or map the shared region.
    #[error("failed to open shared region {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to bind the legacy UDP mirror socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An access fell outside the shared region.
    #[error("region access out of bounds (offset {offset:#x}, len {len:#x}, region size {size:#x})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Ring geometry does not fit the region or the chunk alignment.
    #[error("invalid ring geometry: {0}")]
    Geometry(String),

    /// The ring's session magic is not present yet.
    #[error("ring at {base:#x} is not ready")]
    NotReady { base: usize },

    /// A cursor published in shared memory points outside the ring's data area.
    #[error("{which} cursor {value:#x} of ring at {base:#x} outside {start:#x}..{end:#x}")]
    CursorOutOfBounds {
        base: usize,
        which: &'static str,
        value: u32,
        start: usize,
        end: usize,
    },

    /// The write cursor is not on a chunk boundary.
    #[error("write cursor {value:#x} of ring at {base:#x} is not chunk aligned")]
    MisalignedCursor { base: usize, value: u32 },

    /// A chunk in the inbound stream does not start with the session magic.
    #[error("invalid chunk magic at offset {offset:#x}")]
    InvalidChunkMagic { offset: usize },

    /// A chunk declares more payload than the drained run holds.
    #[error("chunk at offset {offset:#x} declares {declared} bytes, {available} available")]
    TruncatedChunk {
        offset: usize,
        declared: usize,
        available: usize,
    },

    /// A single chunk payload exceeds the 16-bit size field.
    #[error("chunk payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A computed write offset ran past the ring's data area.
    #[error("ring write overflow at {offset:#x} (data size {size:#x})")]
    Overflow { offset: usize, size: usize },

    /// The peer did not drain the ring before the write deadline.
    ///
    /// `written` payload bytes were published before the stall; the rest
    /// were not written.
    #[error("ring write stalled after {written} bytes; peer did not drain within {waited:?}")]
    WriteTimeout { waited: Duration, written: usize },
}

impl TransportError {
    /// Whether the shared-memory contract is broken and the session must be
    /// torn down.
    ///
    /// Readiness misses and write stalls are recoverable; everything else
    /// means the two sides no longer agree on the region's contents.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            TransportError::NotReady { .. } | TransportError::WriteTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
