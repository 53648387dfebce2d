use std::collections::{HashMap, VecDeque};

use bytes::{Buf, Bytes, BytesMut};
use mchi_transport::{Magic, SharedRegion, Transport, TransportError};
use tracing::{debug, trace};

use crate::codec::{decode_tag, encode_tag, DEFAULT_MAX_PAYLOAD, TAG_HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// A subsystem that consumes and produces tags under one magic.
pub trait TagHandler {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The magic this handler owns.
    fn magic(&self) -> Magic;

    /// Handle one complete tag payload.
    fn process_tag(&mut self, payload: &[u8]) -> std::result::Result<(), Self::Error>;

    /// Take the payloads queued for the target since the last call.
    fn take_outbound(&mut self) -> Vec<Bytes>;
}

/// Reassembles the inbound chunk stream into tags and dispatches them by
/// magic.
pub struct TagRouter<H> {
    handlers: HashMap<Magic, H>,
    recv: BytesMut,
    max_payload: usize,
    /// Framed tags not yet written to the outbound ring.
    send: BytesMut,
    /// Unwritten length of each tag in `send`, oldest first.
    send_tags: VecDeque<usize>,
}

impl<H: TagHandler> TagRouter<H> {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            recv: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
            send: BytesMut::new(),
            send_tags: VecDeque::new(),
        }
    }

    /// Register a handler under its own magic.
    pub fn register(&mut self, handler: H) -> Result<()> {
        let magic = handler.magic();
        if self.handlers.contains_key(&magic) {
            return Err(FrameError::DuplicateHandler(magic));
        }
        debug!(%magic, "tag handler registered");
        self.handlers.insert(magic, handler);
        Ok(())
    }

    pub fn unregister(&mut self, magic: Magic) -> Option<H> {
        self.handlers.remove(&magic)
    }

    pub fn handler(&self, magic: Magic) -> Option<&H> {
        self.handlers.get(&magic)
    }

    pub fn handler_mut(&mut self, magic: Magic) -> Option<&mut H> {
        self.handlers.get_mut(&magic)
    }

    /// Append raw chunk payload bytes to the receive buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.recv.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet dispatched.
    pub fn pending_len(&self) -> usize {
        self.recv.len()
    }

    /// Tags framed but still waiting for room in the outbound ring.
    pub fn unsent_len(&self) -> usize {
        self.send_tags.len()
    }

    /// Drop any partially received tag and every tag still waiting to be
    /// written.
    pub fn clear(&mut self) {
        self.recv.clear();
        self.send.clear();
        self.send_tags.clear();
    }

    /// Drain the transport's inbound ring into the receive buffer.
    pub fn poll<R: SharedRegion>(&mut self, transport: &mut Transport<R>) -> Result<usize> {
        Ok(transport.receive(&mut self.recv)?)
    }

    /// Dispatch the tag at the front of the buffer, if it is complete.
    ///
    /// Returns the magic of the dispatched tag, or `None` when more data is
    /// needed. The tag is consumed before its handler runs, so an unknown
    /// magic or a handler error drops only that tag.
    pub fn dispatch_next(&mut self) -> Result<Option<Magic>> {
        let Some(tag) = decode_tag(&mut self.recv, self.max_payload)? else {
            return Ok(None);
        };
        trace!(magic = %tag.magic, len = tag.payload.len(), "dispatching tag");

        let handler = self
            .handlers
            .get_mut(&tag.magic)
            .ok_or(FrameError::UnknownTag(tag.magic))?;
        handler
            .process_tag(&tag.payload)
            .map_err(|e| FrameError::Handler {
                magic: tag.magic,
                source: Box::new(e),
            })?;
        Ok(Some(tag.magic))
    }

    /// Frame every handler's queued payloads and write them, after any tags
    /// left over from an earlier flush, to the outbound ring.
    ///
    /// While the transport is not ready, everything queued is discarded. If
    /// the ring stays full past the write deadline, the bytes not yet written
    /// are kept, starting mid-tag if need be, and go out first on the next
    /// flush; the call fails with [`FrameError::OutboundStalled`]. Returns
    /// the number of tags completed.
    pub fn flush<R: SharedRegion>(&mut self, transport: &mut Transport<R>) -> Result<usize> {
        if !transport.is_ready() {
            for (magic, handler) in &mut self.handlers {
                let dropped = handler.take_outbound().len();
                if dropped > 0 {
                    debug!(%magic, dropped, "transport not ready, dropping outbound tags");
                }
            }
            if !self.send_tags.is_empty() {
                debug!(dropped = self.send_tags.len(), "transport not ready, dropping unsent tags");
                self.send.clear();
                self.send_tags.clear();
            }
            return Ok(0);
        }

        for (magic, handler) in &mut self.handlers {
            for payload in handler.take_outbound() {
                encode_tag(*magic, &payload, &mut self.send)?;
                self.send_tags.push_back(TAG_HEADER_SIZE + payload.len());
            }
        }
        if self.send.is_empty() {
            return Ok(0);
        }

        match transport.send(&self.send) {
            Ok(()) => {
                let sent = self.send_tags.len();
                self.send.clear();
                self.send_tags.clear();
                Ok(sent)
            }
            Err(TransportError::WriteTimeout { waited, written }) => {
                let sent = self.consume_sent(written);
                debug!(sent, pending = self.send_tags.len(), "outbound ring stalled, keeping unsent tags");
                Err(FrameError::OutboundStalled {
                    sent,
                    pending: self.send_tags.len(),
                    waited,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop `written` bytes from the front of the send buffer. Returns the
    /// number of tags that are now fully written.
    fn consume_sent(&mut self, written: usize) -> usize {
        self.send.advance(written);
        let mut left = written;
        let mut done = 0;
        while let Some(front) = self.send_tags.front_mut() {
            if left >= *front {
                left -= *front;
                self.send_tags.pop_front();
                done += 1;
            } else {
                *front -= left;
                break;
            }
        }
        done
    }
}

impl<H: TagHandler> Default for TagRouter<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> std::fmt::Debug for TagRouter<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRouter")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("pending", &self.recv.len())
            .field("unsent", &self.send_tags.len())
            .finish()
    }
}
