use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

use codec::address::{Address, Handle};

use crate::error::Error;

/// Bits of a shutdown mask. `RD` mirrors the read side having been closed,
/// `WR` the write side.
pub mod shutdown {
    pub const RD: u8 = 0b01;
    pub const WR: u8 = 0b10;
    pub const RDWR: u8 = RD | WR;
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// What kind of socket this is. DGRAM sockets never enter the stream state
/// machine; they are a thin passthrough to the datagram transport (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Dgram,
    Stream,
}

/// The stream socket's state, per §3 "Lifecycle" and §3 invariant 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconnected,
    Listen,
    Connecting,
    Connected,
    Disconnecting,
    /// Terminal: torn down, no longer reachable through any table.
    Free,
}

/// The negotiated shared-memory queue pair once the handshake has produced
/// one. Absent before `OFFER`/`ATTACH` completes.
#[derive(Debug, Clone, Copy)]
pub struct QueuePair {
    pub handle: Handle,
    pub produce_size: u64,
    pub consume_size: u64,
}

/// Event-subscription handle, opaque to this crate beyond being passed back
/// to `QueuePairTransport::unsubscribe`.
pub type SubscriptionId = u64;

/// Everything about a socket that can change after construction, behind one
/// lock. See §5 "Locks": this plays the role of the per-socket sleeping lock,
/// and the dispatcher's `try_lock` on it is the "owned by user?" test.
pub struct Inner {
    pub kind: Kind,
    pub local: Address,
    pub remote: Address,
    pub state: State,
    pub qp: Option<QueuePair>,
    pub qp_min: u64,
    pub qp_default: u64,
    pub qp_max: u64,
    pub attach_sub: Option<SubscriptionId>,
    pub detach_sub: Option<SubscriptionId>,
    pub peer_shutdown: u8,
    pub local_shutdown: u8,
    pub trusted: bool,
    /// Non-owning back-reference from a server-side pending/accepted child
    /// to its listener. Owning direction is listener -> child (§9 "Cyclic
    /// references").
    pub listener: Option<Weak<Socket>>,
    pub rejected: bool,
    pub ack_backlog: u32,
    pub max_ack_backlog: u32,
    pub error: Option<Error>,
    /// Listener-only: children whose handshake is in flight.
    pub pending: Vec<Arc<Socket>>,
    /// Listener-only: children whose handshake completed, awaiting accept().
    pub accept_queue: VecDeque<Arc<Socket>>,
    /// DGRAM-only: datagrams delivered by the transport, awaiting `recvmsg`.
    pub dgram_queue: VecDeque<(Address, Vec<u8>)>,
}

impl Inner {
    fn new(kind: Kind, trusted: bool, qp_min: u64, qp_default: u64, qp_max: u64) -> Self {
        Self {
            kind,
            local: Address::new(codec::address::CID_ANY, codec::address::PORT_ANY),
            remote: Address::new(codec::address::CID_ANY, codec::address::PORT_ANY),
            state: State::Unconnected,
            qp: None,
            qp_min,
            qp_default,
            qp_max,
            attach_sub: None,
            detach_sub: None,
            peer_shutdown: 0,
            local_shutdown: 0,
            trusted,
            listener: None,
            rejected: false,
            ack_backlog: 0,
            max_ack_backlog: 0,
            error: None,
            pending: Vec::new(),
            accept_queue: VecDeque::new(),
            dgram_queue: VecDeque::new(),
        }
    }
}

/// A socket. Every table or list membership holding an `Arc<Socket>` is one
/// reference (§5 "Reference counting", §9 "arena-backed id"); there is no
/// separate refcount field, `Arc::strong_count` is the count and the final
/// `Drop` below runs the teardown once it reaches zero.
pub struct Socket {
    pub id: u64,
    pub inner: Mutex<Inner>,
    /// Per-socket wait queue (§5 "Suspension points").
    pub notify: Notify,
}

impl Socket {
    pub fn new(kind: Kind, trusted: bool, qp_min: u64, qp_default: u64, qp_max: u64) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner::new(kind, trusted, qp_min, qp_default, qp_max)),
            notify: Notify::new(),
        })
    }

    /// Wake every task blocked in a suspension point on this socket. Called
    /// whenever state, shutdown mask, queue-pair readiness, or the error
    /// field changes.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }
}

impl Drop for Inner {
    /// Final teardown once the last `Arc<Socket>` referencing this inner is
    /// dropped: §4's Lifecycle "unsubscribe events, detach queue pair,
    /// verify not in any table, decrement global socket counter" is carried
    /// out incrementally as the fields themselves drop (subscriptions and
    /// the queue pair are released by the transport wrapper that owns them,
    /// see `Registry::release`); this impl only asserts the invariant that
    /// by the time we get here the socket holds no outstanding children.
    fn drop(&mut self) {
        debug_assert!(self.pending.is_empty());
        debug_assert!(self.accept_queue.is_empty());
    }
}
