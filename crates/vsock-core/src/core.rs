use std::sync::Arc;

use tokio::task::JoinHandle;

use codec::packet::Packet;

use crate::dispatcher::Dispatcher;
use crate::registry::Registry;
use crate::socket::{Kind, Socket};
use crate::transport::{DatagramTransport, Event, QueuePairTransport};

/// Default queue-pair size bounds, carried over from the original
/// implementation's `VSOCK_DEFAULT_QP_SIZE_{MIN,,MAX}` (128 / 65536 / 262144
/// bytes).
pub const QP_SIZE_MIN: u64 = 128;
pub const QP_SIZE_DEFAULT: u64 = 65536;
pub const QP_SIZE_MAX: u64 = 262144;

/// Owns the registry, the transport handles, and the dispatcher's worker
/// task: one `Core` per address-family instance this process hosts. Sockets
/// are created through it and carry an `Arc<Core>` internally so their
/// `Drop` can reach the registry and transports during teardown.
pub struct Core {
    registry: Arc<Registry>,
    datagram: Arc<dyn DatagramTransport>,
    qpt: Arc<dyn QueuePairTransport>,
    dispatcher: Arc<Dispatcher>,
    worker: JoinHandle<()>,
    qp_min: u64,
    qp_default: u64,
    qp_max: u64,
}

impl Core {
    pub fn new(
        datagram: Arc<dyn DatagramTransport>,
        qpt: Arc<dyn QueuePairTransport>,
        max_threads: usize,
    ) -> Arc<Self> {
        Self::with_qp_bounds(datagram, qpt, max_threads, QP_SIZE_MIN, QP_SIZE_DEFAULT, QP_SIZE_MAX)
    }

    pub fn with_qp_bounds(
        datagram: Arc<dyn DatagramTransport>,
        qpt: Arc<dyn QueuePairTransport>,
        max_threads: usize,
        qp_min: u64,
        qp_default: u64,
        qp_max: u64,
    ) -> Arc<Self> {
        let registry = Registry::new(datagram.local_cid(), max_threads);
        let (dispatcher, worker) = Dispatcher::new(registry.clone(), datagram.clone(), qpt.clone());

        Arc::new(Self { registry, datagram, qpt, dispatcher, worker, qp_min, qp_default, qp_max })
    }

    pub fn local_cid(&self) -> u32 {
        self.datagram.local_cid()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn datagram(&self) -> &Arc<dyn DatagramTransport> {
        &self.datagram
    }

    pub fn queue_pairs(&self) -> &Arc<dyn QueuePairTransport> {
        &self.qpt
    }

    /// Feed an inbound control packet to the dispatcher. Called by whatever
    /// drives the underlying transport (§1's "kernel glue", out of scope
    /// here beyond this entry point).
    pub fn on_packet(&self, packet: Packet) {
        self.dispatcher.on_packet(packet);
    }

    pub fn on_event(&self, event: Event) {
        self.dispatcher.on_event(event);
    }

    pub fn create_socket(&self, kind: Kind, trusted: bool) -> Arc<Socket> {
        let socket = Socket::new(kind, trusted, self.qp_min, self.qp_default, self.qp_max);
        self.registry.on_socket_created();
        socket
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
