//! Shared-memory transport for host I/O with a running target.
//!
//! The target exposes a fixed-size memory block that both sides poll. Inside
//! it live two single-producer/single-consumer byte rings, one per direction:
//! - A 4-byte session magic marking the ring as ready
//! - Big-endian read and write cursors mirrored by both ends
//! - A data area carrying 32-byte aligned chunks (`magic + u16 size + payload`)
//!
//! This is the lowest layer of mchi. Everything else builds on the
//! [`Transport`] type provided here.

pub mod chunk;
pub mod error;
pub mod hio2;
pub mod magic;
pub mod region;
pub mod ring;
pub mod transport;

#[cfg(unix)]
pub mod mmap;

pub use chunk::{
    chunk_wire_size, decode_chunks, encode_chunk, CHUNK_ALIGN, CHUNK_HEADER_SIZE,
    MAX_CHUNK_PAYLOAD,
};
pub use error::{Result, TransportError};
pub use hio2::{Hio2Region, HIO2_REGION_SIZE};
pub use magic::{Magic, SESSION_MAGIC};
pub use region::{LocalRegion, SharedRegion};
pub use ring::{ChannelConfig, RingChannel, RingGeometry, RingStatus, DATA_OFFSET};
pub use transport::{Transport, TransportLayout, TransportStatus};

#[cfg(unix)]
pub use mmap::MappedRegion;
