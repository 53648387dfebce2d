//! One controller session: a transport, the tag router and the object tree.

use std::time::Instant;

use mchi_frame::{FrameError, TagRouter};
use mchi_transport::{ChannelConfig, SharedRegion, Transport, TransportLayout};
use tracing::{debug, info, warn};

use crate::control::ControlInput;
use crate::error::{JorError, Result};
use crate::node::NodeId;
use crate::protocol::{ObjectTreeProtocol, ProtocolConfig, TreeEvent, OREF_MAGIC};

/// Configuration for a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub channel: ChannelConfig,
    pub layout: TransportLayout,
    pub protocol: ProtocolConfig,
}

/// What one [`Session::pump`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// A target was attached at the end of the pump.
    pub connected: bool,
    /// Tag stream bytes taken from the inbound ring.
    pub bytes_received: usize,
    /// Tags handled without error.
    pub tags_dispatched: usize,
    /// Tags dropped for an unknown magic or a decode fault.
    pub tags_dropped: usize,
    /// `GenObjectInfo` requests queued by the sweep.
    pub requests_swept: usize,
    /// Tags written to the outbound ring.
    pub tags_sent: usize,
    /// Tags still waiting for room in the outbound ring. They are written
    /// first on the next pump.
    pub tags_unsent: usize,
}

/// Drives one transport.
///
/// The object tree lives only while a target is attached. When the rings
/// disappear or the region's generation changes, the tree is discarded; a new
/// one is built, starting from a root request, once the target is back. The
/// transport itself survives reconnects.
pub struct Session<R> {
    transport: Transport<R>,
    router: TagRouter<ObjectTreeProtocol>,
    protocol_config: ProtocolConfig,
    connected: bool,
    generation: u64,
}

impl<R: SharedRegion> Session<R> {
    /// Wrap a region with the configured ring layout.
    pub fn new(region: R, config: SessionConfig) -> Result<Self> {
        let transport = Transport::new(region, config.layout, config.channel)?;
        Ok(Self::with_transport(transport, config.protocol))
    }

    pub fn with_transport(transport: Transport<R>, protocol: ProtocolConfig) -> Self {
        Self {
            transport,
            router: TagRouter::new(),
            protocol_config: protocol,
            connected: false,
            generation: 0,
        }
    }

    pub fn pump(&mut self) -> Result<PumpReport> {
        self.pump_at(Instant::now())
    }

    /// Run one poll cycle: receive, dispatch, sweep, flush.
    ///
    /// Message-level faults are logged and counted. Faults that leave the
    /// rings or the tag stream unusable tear the tree down and are returned.
    pub fn pump_at(&mut self, now: Instant) -> Result<PumpReport> {
        let mut report = PumpReport::default();

        let ready = self.transport.is_ready();
        let generation = self.transport.region().generation();
        if self.connected && (!ready || generation != self.generation) {
            self.disconnect(if ready { "target re-attached" } else { "target detached" });
        }
        if !ready {
            return Ok(report);
        }
        if !self.connected {
            self.connect(generation)?;
        }

        report.bytes_received = match self.router.poll(&mut self.transport) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };

        loop {
            match self.router.dispatch_next() {
                Ok(Some(_)) => report.tags_dispatched += 1,
                Ok(None) => break,
                Err(e) if e.is_session_fatal() => return Err(self.fail(e)),
                Err(e) => {
                    warn!(error = %e, "tag dropped");
                    report.tags_dropped += 1;
                }
            }
        }

        // Requests still stuck behind a full ring have not timed out.
        if self.router.unsent_len() == 0 {
            if let Some(protocol) = self.router.handler_mut(OREF_MAGIC) {
                report.requests_swept = protocol.sweep(now);
            }
        }

        match self.router.flush(&mut self.transport) {
            Ok(n) => report.tags_sent = n,
            Err(FrameError::OutboundStalled {
                sent,
                pending,
                waited,
            }) => {
                warn!(?waited, sent, pending, "target is not draining its ring, holding outbound tags");
                report.tags_sent = sent;
            }
            Err(e) if e.is_session_fatal() => return Err(self.fail(e)),
            Err(e) => warn!(error = %e, "outbound tags dropped"),
        }

        report.tags_unsent = self.router.unsent_len();
        report.connected = self.connected;
        Ok(report)
    }

    /// Whether a target is attached and a tree is being mirrored.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The object tree of the current target, if one is attached.
    pub fn protocol(&self) -> Option<&ObjectTreeProtocol> {
        self.router.handler(OREF_MAGIC)
    }

    pub fn protocol_mut(&mut self) -> Option<&mut ObjectTreeProtocol> {
        self.router.handler_mut(OREF_MAGIC)
    }

    /// Take the tree events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<TreeEvent> {
        self.protocol_mut()
            .map(ObjectTreeProtocol::drain_events)
            .unwrap_or_default()
    }

    /// Change a control's value. The property event goes out on the next
    /// pump.
    pub fn set_value(&mut self, node: NodeId, control_id: u32, input: ControlInput) -> Result<bool> {
        self.protocol_mut()
            .ok_or(JorError::NotConnected)?
            .set_value(node, control_id, input)
    }

    /// Inbound bytes buffered but not yet dispatched.
    pub fn pending_len(&self) -> usize {
        self.router.pending_len()
    }

    /// Outbound tags queued or held back by a full ring.
    pub fn unsent_len(&self) -> usize {
        self.router.unsent_len() + self.protocol().map_or(0, ObjectTreeProtocol::outbound_len)
    }

    pub fn transport(&self) -> &Transport<R> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<R> {
        &mut self.transport
    }

    pub fn into_transport(self) -> Transport<R> {
        self.transport
    }

    fn connect(&mut self, generation: u64) -> Result<()> {
        let mut protocol = ObjectTreeProtocol::new(self.protocol_config.clone());
        protocol.request_root();
        self.router.clear();
        self.router.register(protocol)?;
        self.connected = true;
        self.generation = generation;
        info!(generation, "target attached");
        Ok(())
    }

    fn disconnect(&mut self, reason: &str) {
        self.router.unregister(OREF_MAGIC);
        self.router.clear();
        self.connected = false;
        info!(reason, "object tree discarded");
    }

    fn fail(&mut self, err: FrameError) -> JorError {
        debug!(error = %err, "session fault");
        self.disconnect("session fault");
        err.into()
    }
}

impl<R> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("router", &self.router)
            .field("connected", &self.connected)
            .field("generation", &self.generation)
            .finish()
    }
}
