//! Tag framing and routing on top of the mchi chunk stream.
//!
//! Chunk payloads drained from the inbound ring form a byte stream of tags:
//! - A 4-byte ASCII magic naming the subsystem (`ORef` for the object tree)
//! - A 4-byte big-endian payload length
//! - The payload itself, handed whole to the handler registered for the magic
//!
//! Handlers also get the field codecs used inside payloads: big-endian
//! integers and floats, and `u16`-length-prefixed Shift-JIS strings.

pub mod codec;
pub mod cursor;
pub mod error;
pub mod router;
pub mod sjis;

pub use codec::{decode_tag, encode_tag, Tag, DEFAULT_MAX_PAYLOAD, TAG_HEADER_SIZE};
pub use cursor::{ByteReader, ByteWriter};
pub use error::{FrameError, Result};
pub use router::{TagHandler, TagRouter};

pub use mchi_transport::Magic;
