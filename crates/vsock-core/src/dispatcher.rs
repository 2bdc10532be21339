use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use codec::packet::{Body, Packet};

use crate::events;
use crate::registry::Registry;
use crate::socket::{Socket, State};
use crate::state_machine::{connected, connecting, listener, pending};
use crate::transport::{DatagramTransport, Event, QueuePairTransport};

enum WorkItem {
    Packet { socket: Arc<Socket>, packet: Packet },
    Event(Event),
}

/// Receives control packets and transport events from the bottom-half
/// context and routes them to the stream state machine (§4.2).
///
/// Heavy work — anything that isn't a pure notify on an already-connected,
/// currently-unowned socket — is handed to a single-threaded deferred
/// worker task, so a socket's work items are always processed in the order
/// they were dispatched and never interleaved with that socket's own
/// user-context call.
pub struct Dispatcher {
    registry: Arc<Registry>,
    datagram: Arc<dyn DatagramTransport>,
    qpt: Arc<dyn QueuePairTransport>,
    work_tx: mpsc::UnboundedSender<WorkItem>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        datagram: Arc<dyn DatagramTransport>,
        qpt: Arc<dyn QueuePairTransport>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (work_tx, mut work_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(Self { registry, datagram, qpt, work_tx });
        let worker_dispatcher = dispatcher.clone();

        let handle = tokio::spawn(async move {
            while let Some(item) = work_rx.recv().await {
                worker_dispatcher.process(item);
            }
        });

        (dispatcher, handle)
    }

    /// Entry point from the bottom-half context. Must not block.
    ///
    /// Mirrors `VSockVmciRecvStreamCB`'s validation ahead of the table
    /// lookup: a packet whose source cid names no real socket participant,
    /// or whose destination doesn't name this endpoint, is dropped outright
    /// rather than routed.
    pub fn on_packet(&self, packet: Packet) {
        if packet.src.cid == codec::address::CID_ANY || packet.dst.cid != self.datagram.local_cid() {
            return;
        }

        if self.datagram.is_restricted(packet.src.cid) && !self.target_trusted(&packet) {
            return;
        }

        let socket = self
            .registry
            .lookup_connected(&packet.src, &packet.dst)
            .or_else(|| self.registry.lookup_bound(&packet.dst));

        let Some(socket) = socket else {
            if !matches!(packet.body, Body::Rst) {
                let _ = self.datagram.send(Packet::new(packet.dst, packet.src, Body::Rst));
            }
            return;
        };

        if self.try_fast_path(&socket, &packet) {
            return;
        }

        let _ = self.work_tx.send(WorkItem::Packet { socket, packet });
    }

    /// Entry point for a transport [`Event`] (PEER_ATTACH/PEER_DETACH/RESUMED).
    pub fn on_event(&self, event: Event) {
        let _ = self.work_tx.send(WorkItem::Event(event));
    }

    fn target_trusted(&self, packet: &Packet) -> bool {
        self.registry
            .lookup_connected(&packet.src, &packet.dst)
            .or_else(|| self.registry.lookup_bound(&packet.dst))
            .map(|socket| socket.inner.lock().trusted)
            .unwrap_or(false)
    }

    /// Fast path (§4.2): a pure-notify packet on a `CONNECTED` socket that
    /// isn't presently locked by a user-context call can be handled inline.
    fn try_fast_path(&self, socket: &Arc<Socket>, packet: &Packet) -> bool {
        if !matches!(packet.body, Body::Wrote { .. } | Body::Read { .. } | Body::WaitingRead { .. } | Body::WaitingWrite { .. }) {
            return false;
        }

        let Some(inner) = socket.inner.try_lock() else {
            return false;
        };

        if inner.state != State::Connected {
            return false;
        }

        drop(inner);
        connected::on_receive(&self.registry, self.datagram.as_ref(), self.qpt.as_ref(), socket, *packet);
        true
    }

    fn process(&self, item: WorkItem) {
        match item {
            WorkItem::Packet { socket, packet } => self.process_packet(socket, packet),
            WorkItem::Event(event) => events::handle(&self.registry, event),
        }
    }

    fn process_packet(&self, socket: Arc<Socket>, packet: Packet) {
        let state = socket.inner.lock().state;

        match state {
            State::Listen => listener::on_receive(&self.registry, self.datagram.as_ref(), &socket, packet.src, packet),
            State::Connecting => {
                if let Some(parent) = socket.inner.lock().listener.as_ref().and_then(|w| w.upgrade()) {
                    pending::on_receive(&self.registry, self.datagram.as_ref(), self.qpt.as_ref(), &parent, &socket, packet)
                } else {
                    connecting::on_receive(&self.registry, self.datagram.as_ref(), self.qpt.as_ref(), &socket, packet)
                }
            }
            State::Connected => connected::on_receive(&self.registry, self.datagram.as_ref(), self.qpt.as_ref(), &socket, packet),
            _ => {
                let _ = self.datagram.send(Packet::new(packet.dst, packet.src, Body::Rst));
            }
        }
    }
}
