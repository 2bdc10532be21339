use codec::address::{Address, Handle};
use codec::packet::Packet;

use crate::error::Result;
use crate::socket::SubscriptionId;

/// Events the queue-pair transport can raise asynchronously, consumed by the
/// core's dispatcher alongside control packets (§6 "Events consumed").
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// The peer has attached to the queue pair identified by this handle.
    PeerAttach(Handle),
    /// The peer has detached (crashed, closed, or explicitly torn down).
    PeerDetach(Handle),
    /// The hypervisor resumed this VM; every queue pair must be treated as
    /// if its peer just detached (§8 scenario S6).
    Resumed,
}

/// Sends and receives the control-channel datagrams carrying [`Packet`]s.
///
/// This is the `dg_create`/`dg_destroy`/`dg_send` surface of §6, reduced to
/// what the core actually calls: creation and destruction of the control
/// channel happen once per [`crate::core::Core`], not per socket, so only
/// `send` and address discovery are exposed per-call.
pub trait DatagramTransport: Send + Sync {
    /// This endpoint's own context id (`get_context_id`).
    fn local_cid(&self) -> u32;

    /// Whether `cid` is restricted from reaching untrusted sockets
    /// (`get_priv_flags`).
    fn is_restricted(&self, cid: u32) -> bool;

    /// Send a control packet. Errors here become `RST` replies or are
    /// surfaced to the caller, depending on context.
    fn send(&self, packet: Packet) -> Result<()>;

    /// The largest payload a single DGRAM datagram may carry. Sending more
    /// is rejected with `EMSGSIZE` before this trait is ever called (§4.4
    /// "DGRAM bind/send/recv").
    fn max_datagram_size(&self) -> usize;

    /// Send a DGRAM payload (as opposed to a control [`Packet`]) from `local`
    /// to `dst`. Out of scope beyond this passthrough call (§1).
    fn send_dgram(&self, local: Address, dst: Address, payload: &[u8]) -> Result<()>;
}

/// The shared-memory ring-buffer queue-pair primitive (§6 `qp_*` functions).
///
/// A `Handle` names one queue pair. The trait intentionally mirrors the
/// underlying C API's shape (separate alloc/attach/detach, vectored
/// enqueue/dequeue, explicit free-space/ready queries) rather than hiding it
/// behind a `Read`/`Write`-style abstraction, because the state machine in
/// §4.3 depends on exactly these operations being individually observable
/// (e.g. it must allocate before it can offer a handle to the peer, and
/// attach only after receiving one).
pub trait QueuePairTransport: Send + Sync {
    /// Allocate a new queue pair sized `produce_size`/`consume_size` for
    /// communication with `peer_cid`. `privileged` requests the privileged
    /// variant used by trusted sockets.
    fn alloc(&self, peer_cid: u32, produce_size: u64, consume_size: u64, privileged: bool) -> Result<Handle>;

    /// Attach to a queue pair the peer already allocated and offered.
    fn attach(&self, handle: Handle, peer_cid: u32) -> Result<()>;

    fn detach(&self, handle: Handle);

    fn enqueue(&self, handle: Handle, data: &[u8]) -> Result<usize>;

    fn dequeue(&self, handle: Handle, buf: &mut [u8], peek: bool) -> Result<usize>;

    fn buf_ready(&self, handle: Handle) -> u64;

    fn free_space(&self, handle: Handle) -> u64;

    fn subscribe_attach(&self, handle: Handle) -> SubscriptionId;

    fn subscribe_detach(&self, handle: Handle) -> SubscriptionId;

    fn unsubscribe(&self, sub: SubscriptionId);
}
