use bytes::BytesMut;
use tracing::trace;

use crate::chunk::decode_chunks;
use crate::error::Result;
use crate::region::SharedRegion;
use crate::ring::{ChannelConfig, RingChannel, RingGeometry, RingStatus};

/// Ring placement within the shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLayout {
    /// Ring we write (PC to target).
    pub outbound: RingGeometry,
    /// Ring we read (target to PC).
    pub inbound: RingGeometry,
}

impl TransportLayout {
    /// Total region size this layout needs.
    pub fn region_size(&self) -> usize {
        self.outbound.end().max(self.inbound.end())
    }

    /// The same layout seen from the target's side.
    pub fn mirrored(&self) -> Self {
        Self {
            outbound: self.inbound,
            inbound: self.outbound,
        }
    }
}

impl Default for TransportLayout {
    fn default() -> Self {
        Self {
            outbound: RingGeometry::new(0x0000, 0x1000),
            inbound: RingGeometry::new(0x1000, 0x1000),
        }
    }
}

/// Header snapshot of both rings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStatus {
    pub outbound: RingStatus,
    pub inbound: RingStatus,
}

/// A shared region plus the two rings carved out of it.
pub struct Transport<R> {
    region: R,
    outbound: RingChannel,
    inbound: RingChannel,
}

impl<R: SharedRegion> Transport<R> {
    /// Wrap a region. Fails if the layout does not fit it.
    pub fn new(region: R, layout: TransportLayout, config: ChannelConfig) -> Result<Self> {
        let outbound = RingChannel::new(layout.outbound, config.clone())?;
        let inbound = RingChannel::new(layout.inbound, config)?;
        crate::region::check_bounds(0, layout.region_size(), region.len())?;
        Ok(Self {
            region,
            outbound,
            inbound,
        })
    }

    /// Whether a target is attached and has published both rings.
    pub fn is_ready(&self) -> bool {
        self.region.is_attached()
            && self.outbound.is_ready(&self.region)
            && self.inbound.is_ready(&self.region)
    }

    /// Drain the inbound ring, appending decoded chunk payloads to `dst`.
    ///
    /// Returns the number of payload bytes appended.
    pub fn receive(&mut self, dst: &mut BytesMut) -> Result<usize> {
        let raw = self.inbound.read(&mut self.region)?;
        if raw.is_empty() {
            return Ok(0);
        }
        let n = decode_chunks(&raw, dst)?;
        trace!(raw = raw.len(), payload = n, "received chunks");
        Ok(n)
    }

    /// Write `payload` to the outbound ring.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.outbound.write(&mut self.region, payload)
    }

    /// Initialize both rings. Only for the side that owns the region.
    pub fn initialize(&mut self) -> Result<()> {
        self.outbound.initialize(&mut self.region)?;
        self.inbound.initialize(&mut self.region)
    }

    pub fn status(&self) -> Result<TransportStatus> {
        Ok(TransportStatus {
            outbound: self.outbound.status(&self.region)?,
            inbound: self.inbound.status(&self.region)?,
        })
    }

    pub fn layout(&self) -> TransportLayout {
        TransportLayout {
            outbound: self.outbound.geometry(),
            inbound: self.inbound.geometry(),
        }
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut R {
        &mut self.region
    }

    pub fn into_inner(self) -> R {
        self.region
    }
}

impl<R> std::fmt::Debug for Transport<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("outbound", &self.outbound.geometry())
            .field("inbound", &self.inbound.geometry())
            .finish_non_exhaustive()
    }
}
