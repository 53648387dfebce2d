//! Legacy UDP mirror of the host I/O region.
//!
//! Older emulator builds do not export the region as a file. Instead they
//! stream every byte store as a datagram and apply the ones we send back, so
//! each side keeps a full copy of the block.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::region::{check_bounds, SharedRegion};

/// Size of the mirrored block.
pub const HIO2_REGION_SIZE: usize = 0x2000;

/// Port the emulator sends to by default.
pub const DEFAULT_HIO2_PORT: u16 = 1234;

const WRITE_COMMAND: u8 = b'W';
const RECV_POLL: Duration = Duration::from_millis(100);

struct Mirror {
    buf: Vec<u8>,
    peer: Option<SocketAddr>,
    generation: u64,
}

struct Shared {
    mirror: Mutex<Mirror>,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Region backed by the UDP byte-mirror protocol.
///
/// A background thread applies incoming `{index: i16 LE, 'W', value}`
/// datagrams to the local copy. A single-byte datagram is a handshake: the
/// copy is zeroed, the sender becomes the peer and [`generation`] advances.
///
/// [`generation`]: SharedRegion::generation
pub struct Hio2Region {
    socket: UdpSocket,
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
}

impl Hio2Region {
    /// Bind the mirror socket and start the receiver thread.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let rx = socket.try_clone()?;
        rx.set_read_timeout(Some(RECV_POLL))?;

        let shared = Arc::new(Shared {
            mirror: Mutex::new(Mirror {
                buf: vec![0; HIO2_REGION_SIZE],
                peer: None,
                generation: 0,
            }),
            stop: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let receiver = thread::Builder::new()
            .name("mchi-hio2-rx".into())
            .spawn(move || receive_loop(&rx, &thread_shared))?;

        info!(addr = %socket.local_addr()?, "hio2 mirror listening");
        Ok(Self {
            socket,
            shared,
            receiver: Some(receiver),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The target currently mirrored, if one has shown up.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.lock().peer
    }
}

impl SharedRegion for Hio2Region {
    fn len(&self) -> usize {
        HIO2_REGION_SIZE
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_bounds(offset, dst.len(), HIO2_REGION_SIZE)?;
        let mirror = self.shared.lock();
        dst.copy_from_slice(&mirror.buf[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        check_bounds(offset, src.len(), HIO2_REGION_SIZE)?;
        let peer = {
            let mut mirror = self.shared.lock();
            mirror.buf[offset..offset + src.len()].copy_from_slice(src);
            mirror.peer
        };

        let Some(peer) = peer else {
            return Ok(());
        };
        for (i, &value) in src.iter().enumerate() {
            let index = (offset + i) as i16;
            let [lo, hi] = index.to_le_bytes();
            self.socket.send_to(&[lo, hi, WRITE_COMMAND, value], peer)?;
        }
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.shared.lock().peer.is_some()
    }

    fn generation(&self) -> u64 {
        self.shared.lock().generation
    }
}

impl Drop for Hio2Region {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.receiver.take() {
            join_receiver(handle);
        }
    }
}

/// Wait for the receiver thread. Returns false if it panicked.
fn join_receiver(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            warn!(reason, "hio2 receiver thread panicked");
            false
        }
    }
}

impl std::fmt::Debug for Hio2Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hio2Region")
            .field("local", &self.socket.local_addr().ok())
            .field("peer", &self.peer())
            .finish()
    }
}

fn receive_loop(socket: &UdpSocket, shared: &Shared) {
    let mut datagram = [0u8; 64];
    while !shared.stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut datagram) {
            Ok((n, from)) => apply_datagram(&mut shared.lock(), &datagram[..n], from),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            // Windows reports ICMP port-unreachable from earlier sends here.
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => {
                warn!("hio2 receive failed: {e}");
                thread::sleep(RECV_POLL);
            }
        }
    }
    debug!("hio2 receiver stopped");
}

fn apply_datagram(mirror: &mut Mirror, data: &[u8], from: SocketAddr) {
    match data {
        [_] => {
            mirror.buf.fill(0);
            mirror.peer = Some(from);
            mirror.generation += 1;
            info!(peer = %from, generation = mirror.generation, "hio2 handshake");
        }
        [lo, hi, cmd, value] => {
            match mirror.peer {
                None => mirror.peer = Some(from),
                Some(peer) if peer != from => {
                    trace!(%from, "ignoring datagram from stale peer");
                    return;
                }
                Some(_) => {}
            }
            if *cmd != WRITE_COMMAND {
                trace!(cmd = *cmd, "ignoring non-write command");
                return;
            }
            let index = i16::from_le_bytes([*lo, *hi]);
            match usize::try_from(index) {
                Ok(i) if i < mirror.buf.len() => mirror.buf[i] = *value,
                _ => debug!(index, "hio2 write outside mirror"),
            }
        }
        _ => trace!(len = data.len(), "ignoring malformed datagram"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn receiver_panic_is_reported_on_join() {
        let clean = thread::spawn(|| {});
        assert!(join_receiver(clean));

        let failed = thread::spawn(|| panic!("socket gone"));
        assert!(!join_receiver(failed));
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn mirror() -> Mirror {
        Mirror {
            buf: vec![0; HIO2_REGION_SIZE],
            peer: None,
            generation: 0,
        }
    }

    #[test]
    fn handshake_resets_and_bumps_generation() {
        let a: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let mut m = mirror();

        apply_datagram(&mut m, &[0x10, 0x00, b'W', 0xAA], a);
        assert_eq!(m.buf[0x10], 0xAA);
        assert_eq!(m.peer, Some(a));

        apply_datagram(&mut m, &[0x11, 0x00, b'W', 0xBB], b);
        assert_eq!(m.buf[0x11], 0, "stale peer must be ignored");

        apply_datagram(&mut m, &[1], b);
        assert_eq!(m.generation, 1);
        assert_eq!(m.peer, Some(b));
        assert!(m.buf.iter().all(|&v| v == 0));
    }

    #[test]
    fn rejects_out_of_range_and_non_write() {
        let from: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut m = mirror();

        apply_datagram(&mut m, &[0xFF, 0xFF, b'W', 1], from);
        apply_datagram(&mut m, &[0x00, 0x20, b'W', 1], from);
        apply_datagram(&mut m, &[0x05, 0x00, b'R', 1], from);
        apply_datagram(&mut m, &[1, 2, 3], from);
        assert!(m.buf.iter().all(|&v| v == 0));
    }

    #[test]
    fn mirrors_both_directions_over_udp() {
        let mut region = Hio2Region::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = region.local_addr().unwrap();
        let target = UdpSocket::bind("127.0.0.1:0").unwrap();
        target.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        assert!(!region.is_attached());
        target.send_to(&[0], addr).unwrap();
        assert!(wait_for(|| region.generation() == 1));
        assert!(region.is_attached());

        target.send_to(&[0x00, 0x10, b'W', b'M'], addr).unwrap();
        assert!(wait_for(|| {
            let mut b = [0u8; 1];
            region.read_bytes(0x1000, &mut b).unwrap();
            b[0] == b'M'
        }));

        region.write_bytes(0x0021, &[0x12, 0x34]).unwrap();
        let mut datagram = [0u8; 8];
        let (n, _) = target.recv_from(&mut datagram).unwrap();
        assert_eq!(&datagram[..n], &[0x21, 0x00, b'W', 0x12]);
        let (n, _) = target.recv_from(&mut datagram).unwrap();
        assert_eq!(&datagram[..n], &[0x22, 0x00, b'W', 0x34]);
    }
}
