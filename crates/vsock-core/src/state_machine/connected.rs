use std::sync::Arc;

use codec::packet::{Body, Packet};

use crate::registry::Registry;
use crate::socket::{shutdown, Socket, State};
use crate::transport::{DatagramTransport, QueuePairTransport};

/// Handles an inbound packet for a `CONNECTED` stream socket (§4.3.4).
pub fn on_receive(registry: &Registry, datagram: &dyn DatagramTransport, qpt: &dyn QueuePairTransport, socket: &Arc<Socket>, packet: Packet) {
    match packet.body {
        Body::Shutdown { mask } => {
            let mut inner = socket.inner.lock();
            inner.peer_shutdown |= mask as u8;
            drop(inner);
            socket.wake();
        }
        Body::Rst => on_rst(registry, qpt, socket),
        Body::Wrote { .. } | Body::Read { .. } | Body::WaitingRead { .. } | Body::WaitingWrite { .. } => {
            // Pure flow-control notifications: nothing but a wakeup is
            // needed, the actual ready/free-space numbers are read fresh
            // from the queue pair by whichever side is blocked.
            socket.wake();
        }
        _ => {
            let (local, remote) = {
                let inner = socket.inner.lock();
                (inner.local, inner.remote)
            };

            let _ = datagram.send(Packet::new(local, remote, Body::Rst));
            on_rst(registry, qpt, socket);
        }
    }
}

/// A `RST` (or an unexpected packet treated as one): mark both directions
/// shut, then drop the connection only once nothing is left in the consume
/// queue, mirroring the half-close-drain path a clean `recvmsg` EOF takes.
/// Until then the socket sits in `Disconnecting` so a caller already blocked
/// in `recvmsg` can still drain what already arrived.
fn on_rst(registry: &Registry, qpt: &dyn QueuePairTransport, socket: &Arc<Socket>) {
    let mut inner = socket.inner.lock();
    inner.peer_shutdown = shutdown::RDWR;

    let queue_empty = inner.qp.map(|qp| qpt.buf_ready(qp.handle) == 0).unwrap_or(true);

    if queue_empty {
        inner.state = State::Unconnected;
        registry.remove_connected(&inner.remote, &inner.local);
    } else if inner.state == State::Connected {
        inner.state = State::Disconnecting;
    }

    drop(inner);
    socket.wake();
}

/// A `PEER_DETACH` event or a VM resume (§8 S5/S6): the peer, and the shared
/// memory backing the queue pair itself, are gone. Drop the connection
/// immediately regardless of what's left unread — unlike `RST`, there is no
/// live queue pair left to drain.
pub fn on_peer_gone(registry: &Registry, socket: &Arc<Socket>) {
    let mut inner = socket.inner.lock();
    inner.peer_shutdown = shutdown::RDWR;
    inner.state = State::Unconnected;
    registry.remove_connected(&inner.remote, &inner.local);
    drop(inner);
    socket.wake();
}
