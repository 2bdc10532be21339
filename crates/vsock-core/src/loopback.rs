//! An in-process transport pairing two [`crate::core::Core`] instances over
//! plain channels and `Mutex`-guarded ring buffers, standing in for the
//! hypervisor's control channel and shared-memory queue pairs (§6 "Loopback
//! transport"). Exists to drive integration tests and the demo binary
//! without any real virtualization host.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use codec::address::Handle;
use codec::packet::Packet;

use crate::core::Core;
use crate::error::{Error, Result};
use crate::socket::SubscriptionId;
use crate::table::Table;
use crate::transport::{DatagramTransport, Event, QueuePairTransport};

const MAX_DATAGRAM_SIZE: usize = 4096;

struct Ring {
    peer_cid: u32,
    produce_size: u64,
    consume_size: u64,
    data: VecDeque<u8>,
    attached: bool,
}

struct Subscription {
    handle: Handle,
    kind: SubKind,
}

#[derive(PartialEq, Eq)]
enum SubKind {
    Attach,
    Detach,
}

/// One endpoint of a loopback pair. Holds this side's half of the control
/// channel and the queue-pair table it allocates into; the peer endpoint is
/// reached through a [`Weak`] so the pair can be torn down in either order.
pub struct LoopbackEndpoint {
    local_cid: u32,
    restricted: Mutex<Vec<u32>>,
    peer: Mutex<Weak<LoopbackEndpoint>>,
    core: Mutex<Weak<Core>>,
    packet_tx: mpsc::UnboundedSender<Bytes>,
    next_resource: AtomicU32,
    rings: Arc<Mutex<Table<Handle, Ring>>>,
    next_sub: AtomicU64,
    subs: Mutex<Table<SubscriptionId, Subscription>>,
}

impl LoopbackEndpoint {
    /// Encodes through the wire codec before handing off, the same as a real
    /// transport would, rather than passing the structured `Packet` across
    /// the channel directly.
    fn deliver(&self, packet: Packet) {
        let mut bytes = BytesMut::with_capacity(32);
        packet.encode(&mut bytes);
        let _ = self.packet_tx.send(bytes.freeze());
    }

    fn core(&self) -> Option<Arc<Core>> {
        self.core.lock().upgrade()
    }

    fn peer(&self) -> Option<Arc<LoopbackEndpoint>> {
        self.peer.lock().upgrade()
    }

    /// The table a `handle` actually lives in. A queue pair is created by
    /// whichever side allocates it (`handle.context` is that side's own
    /// `local_cid`) and opened by the other — one shared region, not two —
    /// so the non-owning side has to reach across to its peer's table
    /// instead of keeping a second copy.
    fn rings_for(&self, handle: Handle) -> Option<Arc<Mutex<Table<Handle, Ring>>>> {
        if handle.context == self.local_cid {
            Some(self.rings.clone())
        } else {
            self.peer().map(|peer| peer.rings.clone())
        }
    }
}

/// Creates two cross-wired [`Core`] instances and the background tasks that
/// pump control packets between them. `cid_a`/`cid_b` become each side's
/// `local_cid`.
///
/// # Test
///
/// ```
/// use vsockd_core::loopback;
/// use vsockd_core::socket::Kind;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let (a, b) = loopback::pair(3, 4, 4);
///     let listener = a.create_socket(Kind::Stream, true);
///     vsockd_core::ops::bind(&a, &listener, codec::address::Address::new(3, 1234)).unwrap();
///     vsockd_core::ops::listen(&listener, 4).unwrap();
///
///     let client = b.create_socket(Kind::Stream, true);
///     let connect = vsockd_core::ops::connect(&b, &client, codec::address::Address::new(3, 1234), None);
///     let accept = vsockd_core::ops::accept(&listener, None);
///
///     let (connect_result, accepted) = tokio::join!(connect, accept);
///     connect_result.unwrap();
///     accepted.unwrap();
/// });
/// ```
pub fn pair(cid_a: u32, cid_b: u32, max_threads: usize) -> (Arc<Core>, Arc<Core>) {
    pair_with_bounds(cid_a, cid_b, max_threads, crate::core::QP_SIZE_MIN, crate::core::QP_SIZE_DEFAULT, crate::core::QP_SIZE_MAX, &[])
}

/// Same as [`pair`], with the queue-pair size bounds every socket created on
/// either `Core` starts with instead of the built-in defaults, and a set of
/// peer cids each side starts out treating as restricted (`is_restricted`) —
/// reachable only by a socket created with its `trusted` bit set.
pub fn pair_with_bounds(cid_a: u32, cid_b: u32, max_threads: usize, qp_min: u64, qp_default: u64, qp_max: u64, restricted: &[u32]) -> (Arc<Core>, Arc<Core>) {
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();

    let endpoint_a = Arc::new(LoopbackEndpoint {
        local_cid: cid_a,
        restricted: Mutex::new(restricted.to_vec()),
        peer: Mutex::new(Weak::new()),
        core: Mutex::new(Weak::new()),
        packet_tx: tx_b,
        next_resource: AtomicU32::new(1),
        rings: Arc::new(Mutex::new(Table::default())),
        next_sub: AtomicU64::new(1),
        subs: Mutex::new(Table::default()),
    });

    let endpoint_b = Arc::new(LoopbackEndpoint {
        local_cid: cid_b,
        restricted: Mutex::new(restricted.to_vec()),
        peer: Mutex::new(Weak::new()),
        core: Mutex::new(Weak::new()),
        packet_tx: tx_a,
        next_resource: AtomicU32::new(1),
        rings: Arc::new(Mutex::new(Table::default())),
        next_sub: AtomicU64::new(1),
        subs: Mutex::new(Table::default()),
    });

    *endpoint_a.peer.lock() = Arc::downgrade(&endpoint_b);
    *endpoint_b.peer.lock() = Arc::downgrade(&endpoint_a);

    let core_a = Core::with_qp_bounds(endpoint_a.clone(), endpoint_a.clone(), max_threads, qp_min, qp_default, qp_max);
    let core_b = Core::with_qp_bounds(endpoint_b.clone(), endpoint_b.clone(), max_threads, qp_min, qp_default, qp_max);

    *endpoint_a.core.lock() = Arc::downgrade(&core_a);
    *endpoint_b.core.lock() = Arc::downgrade(&core_b);

    let pump_a = core_a.clone();
    tokio::spawn(async move {
        while let Some(bytes) = rx_a.recv().await {
            if let Ok(packet) = Packet::decode(&bytes) {
                pump_a.on_packet(packet);
            }
        }
    });

    let pump_b = core_b.clone();
    tokio::spawn(async move {
        while let Some(bytes) = rx_b.recv().await {
            if let Ok(packet) = Packet::decode(&bytes) {
                pump_b.on_packet(packet);
            }
        }
    });

    (core_a, core_b)
}

impl DatagramTransport for LoopbackEndpoint {
    fn local_cid(&self) -> u32 {
        self.local_cid
    }

    fn is_restricted(&self, cid: u32) -> bool {
        self.restricted.lock().contains(&cid)
    }

    fn send(&self, packet: Packet) -> Result<()> {
        self.deliver(packet);
        Ok(())
    }

    fn max_datagram_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    fn send_dgram(&self, local: codec::address::Address, dst: codec::address::Address, payload: &[u8]) -> Result<()> {
        let Some(peer) = self.peer() else {
            return Err(Error::NetUnreach);
        };
        let Some(core) = peer.core() else {
            return Err(Error::NetUnreach);
        };
        if let Some(socket) = core.registry().lookup_bound(&dst) {
            crate::ops::deliver_dgram(&socket, local, payload.to_vec());
        }
        Ok(())
    }
}

impl QueuePairTransport for LoopbackEndpoint {
    fn alloc(&self, peer_cid: u32, produce_size: u64, consume_size: u64, _privileged: bool) -> Result<Handle> {
        let handle = Handle { context: self.local_cid, resource: self.next_resource.fetch_add(1, Ordering::Relaxed) };
        self.rings.lock().insert(handle, Ring { peer_cid, produce_size, consume_size, data: VecDeque::new(), attached: false });
        Ok(handle)
    }

    fn attach(&self, handle: Handle, _peer_cid: u32) -> Result<()> {
        let Some(rings) = self.rings_for(handle) else {
            return Err(Error::Invalid);
        };
        if let Some(ring) = rings.lock().get_mut(&handle) {
            ring.attached = true;
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }

    fn detach(&self, handle: Handle) {
        if let Some(rings) = self.rings_for(handle) {
            rings.lock().remove(&handle);
        }
    }

    fn enqueue(&self, handle: Handle, data: &[u8]) -> Result<usize> {
        let Some(rings) = self.rings_for(handle) else {
            return Err(Error::Invalid);
        };
        let mut rings = rings.lock();
        let Some(ring) = rings.get_mut(&handle) else {
            return Err(Error::Invalid);
        };
        let free = (ring.produce_size as usize).saturating_sub(ring.data.len());
        let n = free.min(data.len());
        ring.data.extend(&data[..n]);
        Ok(n)
    }

    fn dequeue(&self, handle: Handle, buf: &mut [u8], peek: bool) -> Result<usize> {
        let Some(rings) = self.rings_for(handle) else {
            return Err(Error::Invalid);
        };
        let mut rings = rings.lock();
        let Some(ring) = rings.get_mut(&handle) else {
            return Err(Error::Invalid);
        };
        let n = ring.data.len().min(buf.len());
        for (i, byte) in ring.data.iter().take(n).enumerate() {
            buf[i] = *byte;
        }
        if !peek {
            ring.data.drain(..n);
        }
        Ok(n)
    }

    fn buf_ready(&self, handle: Handle) -> u64 {
        let Some(rings) = self.rings_for(handle) else {
            return 0;
        };
        rings.lock().get(&handle).map(|r| r.data.len() as u64).unwrap_or(0)
    }

    fn free_space(&self, handle: Handle) -> u64 {
        let Some(rings) = self.rings_for(handle) else {
            return 0;
        };
        rings.lock().get(&handle).map(|r| r.produce_size.saturating_sub(r.data.len() as u64)).unwrap_or(0)
    }

    fn subscribe_attach(&self, handle: Handle) -> SubscriptionId {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().insert(id, Subscription { handle, kind: SubKind::Attach });
        id
    }

    fn subscribe_detach(&self, handle: Handle) -> SubscriptionId {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().insert(id, Subscription { handle, kind: SubKind::Detach });
        id
    }

    fn unsubscribe(&self, sub: SubscriptionId) {
        self.subs.lock().remove(&sub);
    }
}
