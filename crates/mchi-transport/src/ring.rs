use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::chunk::{encode_chunk, CHUNK_ALIGN, CHUNK_HEADER_SIZE, MAX_CHUNK_PAYLOAD};
use crate::error::{Result, TransportError};
use crate::magic::SESSION_MAGIC;
use crate::region::{check_bounds, SharedRegion};

/// Offset of the session magic within a ring.
pub const MAGIC_OFFSET: usize = 0x00;

/// Offset of the big-endian read cursor within a ring.
pub const READ_CURSOR_OFFSET: usize = 0x20;

/// Offset of the big-endian write cursor within a ring.
pub const WRITE_CURSOR_OFFSET: usize = 0x40;

/// Offset of the first data byte within a ring.
pub const DATA_OFFSET: usize = 0x60;

/// Default pause between capacity re-checks while the ring is full.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Default bound on a single capacity wait.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default gap kept between the write cursor and the peer's read cursor.
pub const DEFAULT_COLLISION_MARGIN: usize = 0x20;

/// Where a ring lives inside the shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    /// Absolute offset of the ring header.
    pub base: usize,
    /// Ring size including the header.
    pub size: usize,
}

impl RingGeometry {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Bytes available for chunk data.
    pub const fn data_size(&self) -> usize {
        self.size.saturating_sub(DATA_OFFSET)
    }

    /// One past the ring's last byte.
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    fn validate(&self) -> Result<()> {
        if self.size <= DATA_OFFSET {
            return Err(TransportError::Geometry(format!(
                "ring at {:#x} is {:#x} bytes, smaller than its header",
                self.base, self.size
            )));
        }
        if self.data_size() % CHUNK_ALIGN != 0 {
            return Err(TransportError::Geometry(format!(
                "ring at {:#x} has {:#x} data bytes, not a multiple of {CHUNK_ALIGN:#x}",
                self.base,
                self.data_size()
            )));
        }
        Ok(())
    }
}

/// Tuning for the writer side of a ring.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Sleep between re-reads of the peer's read cursor while the ring is full.
    pub poll_interval: Duration,
    /// Give up a capacity wait after this long. `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Bytes kept free in front of the peer's read cursor. Must be a non-zero
    /// multiple of the chunk alignment.
    pub collision_margin: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            collision_margin: DEFAULT_COLLISION_MARGIN,
        }
    }
}

/// Snapshot of a ring header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub ready: bool,
    pub read_cursor: u32,
    pub write_cursor: u32,
    /// Bytes published but not yet consumed, if the cursors are sane.
    pub unread: Option<usize>,
}

#[derive(Clone, Copy)]
enum Cursor {
    Read,
    Write,
}

impl Cursor {
    fn offset(self) -> usize {
        match self {
            Cursor::Read => READ_CURSOR_OFFSET,
            Cursor::Write => WRITE_CURSOR_OFFSET,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Cursor::Read => "read",
            Cursor::Write => "write",
        }
    }
}

/// One direction of the shared region: a single-producer/single-consumer byte
/// ring whose cursors live in shared memory.
///
/// The channel holds no state of its own beyond its geometry. Cursors are
/// re-read from the region on every call since the peer moves them.
#[derive(Debug, Clone)]
pub struct RingChannel {
    geometry: RingGeometry,
    config: ChannelConfig,
}

impl RingChannel {
    /// Create a channel, rejecting geometry the chunk format cannot fill.
    pub fn new(geometry: RingGeometry, config: ChannelConfig) -> Result<Self> {
        geometry.validate()?;
        if config.collision_margin == 0 || config.collision_margin % CHUNK_ALIGN != 0 {
            return Err(TransportError::Geometry(format!(
                "collision margin {:#x} must be a non-zero multiple of {CHUNK_ALIGN:#x}",
                config.collision_margin
            )));
        }
        if config.collision_margin >= geometry.data_size() {
            return Err(TransportError::Geometry(format!(
                "collision margin {:#x} leaves no room in {:#x} data bytes",
                config.collision_margin,
                geometry.data_size()
            )));
        }
        Ok(Self { geometry, config })
    }

    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Whether the session magic is present at the ring base.
    pub fn is_ready<R: SharedRegion + ?Sized>(&self, region: &R) -> bool {
        let mut magic = [0u8; 4];
        region
            .read_bytes(self.geometry.base + MAGIC_OFFSET, &mut magic)
            .is_ok()
            && magic == *SESSION_MAGIC.as_bytes()
    }

    /// Reset both cursors to the start of the data area, then publish the
    /// session magic.
    ///
    /// Only the side that owns the region does this; a controller attaching
    /// to a live target never initializes.
    pub fn initialize<R: SharedRegion + ?Sized>(&self, region: &mut R) -> Result<()> {
        check_bounds(self.geometry.base, self.geometry.size, region.len())?;
        let start = DATA_OFFSET as u32;
        region.write_u32(self.geometry.base + READ_CURSOR_OFFSET, start)?;
        region.write_u32(self.geometry.base + WRITE_CURSOR_OFFSET, start)?;
        region.write_bytes(self.geometry.base + MAGIC_OFFSET, SESSION_MAGIC.as_bytes())?;
        debug!(base = self.geometry.base, size = self.geometry.size, "ring initialized");
        Ok(())
    }

    /// Read the ring header without validating it.
    pub fn status<R: SharedRegion + ?Sized>(&self, region: &R) -> Result<RingStatus> {
        let base = self.geometry.base;
        let read_cursor = region.read_u32(base + READ_CURSOR_OFFSET)?;
        let write_cursor = region.read_u32(base + WRITE_CURSOR_OFFSET)?;
        let unread = match (
            self.check_cursor(Cursor::Read, read_cursor),
            self.check_cursor(Cursor::Write, write_cursor),
        ) {
            (Ok(r), Ok(w)) => Some(self.unread(r, w)),
            _ => None,
        };
        Ok(RingStatus {
            ready: self.is_ready(region),
            read_cursor,
            write_cursor,
            unread,
        })
    }

    /// Drain everything between the read and write cursors and publish the
    /// new read cursor.
    ///
    /// Returns the raw chunk stream; an empty buffer means nothing was
    /// pending.
    pub fn read<R: SharedRegion + ?Sized>(&self, region: &mut R) -> Result<Bytes> {
        self.ensure_ready(region)?;
        let r = self.load_cursor(region, Cursor::Read)?;
        let w = self.load_cursor(region, Cursor::Write)?;
        self.ensure_aligned(w)?;
        if r == w {
            return Ok(Bytes::new());
        }

        let data = self.geometry.base + DATA_OFFSET;
        let len = self.unread(r, w);
        let mut buf = BytesMut::zeroed(len);
        if r < w {
            region.read_bytes(data + r, &mut buf)?;
        } else {
            let (tail, head) = buf.split_at_mut(self.geometry.data_size() - r);
            region.read_bytes(data + r, tail)?;
            region.read_bytes(data, head)?;
        }

        self.store_cursor(region, Cursor::Read, w)?;
        trace!(base = self.geometry.base, len, "ring drained");
        Ok(buf.freeze())
    }

    /// Append `payload` as one or more chunks, publishing the write cursor
    /// after each.
    ///
    /// Blocks while the ring is full, re-reading the peer's read cursor every
    /// `poll_interval`. Fails with [`TransportError::WriteTimeout`] if a wait
    /// outlasts `write_timeout`; chunks already published stay published and
    /// the error reports how many payload bytes they carried.
    pub fn write<R: SharedRegion + ?Sized>(&self, region: &mut R, payload: &[u8]) -> Result<()> {
        self.ensure_ready(region)?;
        let data = self.geometry.base + DATA_OFFSET;
        let data_size = self.geometry.data_size();
        let mut w = self.load_cursor(region, Cursor::Write)?;
        self.ensure_aligned(w)?;

        let mut remaining = payload;
        let mut chunk = BytesMut::new();
        let mut waiting_since: Option<Instant> = None;

        while !remaining.is_empty() {
            let r = self.load_cursor(region, Cursor::Read)?;
            let run = self.contiguous_run(r, w);
            if run < CHUNK_ALIGN {
                let since = *waiting_since.get_or_insert_with(|| {
                    debug!(base = self.geometry.base, read = r, write = w, "ring full, waiting");
                    Instant::now()
                });
                if let Some(limit) = self.config.write_timeout {
                    if since.elapsed() >= limit {
                        return Err(TransportError::WriteTimeout {
                            waited: limit,
                            written: payload.len() - remaining.len(),
                        });
                    }
                }
                thread::sleep(self.config.poll_interval);
                continue;
            }
            waiting_since = None;

            let room = (run & !(CHUNK_ALIGN - 1)) - CHUNK_HEADER_SIZE;
            let take = remaining.len().min(room).min(MAX_CHUNK_PAYLOAD);
            chunk.clear();
            let size = encode_chunk(&remaining[..take], &mut chunk)?;
            if w + size > data_size {
                return Err(TransportError::Overflow {
                    offset: w + size,
                    size: data_size,
                });
            }

            region.write_bytes(data + w, &chunk)?;
            w += size;
            if w == data_size {
                w = 0;
            }
            self.store_cursor(region, Cursor::Write, w)?;
            remaining = &remaining[take..];
        }

        Ok(())
    }

    /// Contiguous bytes the writer may fill starting at `w`.
    ///
    /// The writer never catches up to the reader, and never wraps onto a
    /// reader parked at the start of the data area, so `r == w` always
    /// means empty.
    fn contiguous_run(&self, r: usize, w: usize) -> usize {
        let margin = self.config.collision_margin;
        let data_size = self.geometry.data_size();
        if w < r {
            (r - w).saturating_sub(margin)
        } else if r == 0 {
            (data_size - w).saturating_sub(margin)
        } else {
            data_size - w
        }
    }

    fn unread(&self, r: usize, w: usize) -> usize {
        if r <= w {
            w - r
        } else {
            self.geometry.data_size() - r + w
        }
    }

    fn ensure_ready<R: SharedRegion + ?Sized>(&self, region: &R) -> Result<()> {
        if self.is_ready(region) {
            Ok(())
        } else {
            Err(TransportError::NotReady {
                base: self.geometry.base,
            })
        }
    }

    fn ensure_aligned(&self, w: usize) -> Result<()> {
        if w % CHUNK_ALIGN == 0 {
            Ok(())
        } else {
            Err(TransportError::MisalignedCursor {
                base: self.geometry.base,
                value: (w + DATA_OFFSET) as u32,
            })
        }
    }

    /// Load a cursor as a position within the data area.
    fn load_cursor<R: SharedRegion + ?Sized>(&self, region: &R, which: Cursor) -> Result<usize> {
        let value = region.read_u32(self.geometry.base + which.offset())?;
        self.check_cursor(which, value)
    }

    fn check_cursor(&self, which: Cursor, value: u32) -> Result<usize> {
        let value_usize = value as usize;
        if (DATA_OFFSET..self.geometry.size).contains(&value_usize) {
            Ok(value_usize - DATA_OFFSET)
        } else {
            Err(TransportError::CursorOutOfBounds {
                base: self.geometry.base,
                which: which.name(),
                value,
                start: DATA_OFFSET,
                end: self.geometry.size,
            })
        }
    }

    fn store_cursor<R: SharedRegion + ?Sized>(
        &self,
        region: &mut R,
        which: Cursor,
        pos: usize,
    ) -> Result<()> {
        region.write_u32(
            self.geometry.base + which.offset(),
            (pos + DATA_OFFSET) as u32,
        )
    }
}
