use std::time::Duration;

use mchi_transport::{Magic, TransportError};

/// Errors that can occur while framing, routing or decoding tags.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The transport beneath the tag stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A field read ran past the end of the payload.
    #[error("unexpected end of payload (needed {needed} bytes, {remaining} remaining)")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A string does not fit its 16-bit length prefix once encoded.
    #[error("string too long ({len} bytes encoded, max {max})")]
    StringTooLong { len: usize, max: usize },

    /// A tag declares more payload than the router accepts.
    #[error("tag payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// No handler is registered for a tag's magic.
    #[error("no handler registered for tag {0}")]
    UnknownTag(Magic),

    /// A handler for this magic is already registered.
    #[error("handler already registered for tag {0}")]
    DuplicateHandler(Magic),

    /// The outbound ring stayed full past the write deadline. Tags not yet
    /// written stay queued in the router for the next flush.
    #[error("outbound ring stalled for {waited:?} ({sent} tags written, {pending} waiting)")]
    OutboundStalled {
        sent: usize,
        pending: usize,
        waited: Duration,
    },

    /// A handler rejected a tag.
    #[error("{magic} handler failed: {source}")]
    Handler {
        magic: Magic,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FrameError {
    /// Whether the tag stream can no longer be trusted.
    ///
    /// A bad or unroutable tag is dropped and the stream continues; a length
    /// the router refuses leaves it unable to find the next tag boundary.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            FrameError::Transport(e) => e.is_session_fatal(),
            FrameError::PayloadTooLarge { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
