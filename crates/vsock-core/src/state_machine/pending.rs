use std::sync::Arc;

use codec::packet::{Body, Packet};

use crate::registry::Registry;
use crate::socket::{QueuePair, Socket, State};
use crate::transport::{DatagramTransport, QueuePairTransport};

/// Handles an inbound packet for a server-side pending child (§4.3.2).
/// Expects `OFFER`; anything else, including `RST`, destroys the child.
pub fn on_receive(
    registry: &Registry,
    datagram: &dyn DatagramTransport,
    qpt: &dyn QueuePairTransport,
    listener: &Arc<Socket>,
    child: &Arc<Socket>,
    packet: Packet,
) {
    let Body::Offer { handle } = packet.body else {
        destroy(registry, listener, child);
        return;
    };

    let (local, remote, peer_cid, size) = {
        let inner = child.inner.lock();
        (inner.local, inner.remote, inner.remote.cid, inner.qp_default)
    };

    let detach_sub = qpt.subscribe_detach(handle);

    if qpt.attach(handle, peer_cid).is_err() {
        qpt.unsubscribe(detach_sub);
        destroy(registry, listener, child);
        return;
    }

    if datagram.send(Packet::new(local, remote, Body::Attach { handle })).is_err() {
        qpt.unsubscribe(detach_sub);
        qpt.detach(handle);
        destroy(registry, listener, child);
        return;
    }

    {
        let mut inner = child.inner.lock();
        inner.qp = Some(QueuePair { handle, produce_size: size, consume_size: size });
        inner.detach_sub = Some(detach_sub);
        inner.state = State::Connected;
    }

    registry.register_handle(handle, child);

    {
        let mut listener_inner = listener.inner.lock();
        listener_inner.pending.retain(|c| !Arc::ptr_eq(c, child));
        listener_inner.ack_backlog = listener_inner.ack_backlog.saturating_sub(1);
        listener_inner.accept_queue.push_back(child.clone());
    }

    listener.wake();
}

fn destroy(registry: &Registry, listener: &Arc<Socket>, child: &Arc<Socket>) {
    let (local, remote) = {
        let inner = child.inner.lock();
        (inner.local, inner.remote)
    };

    registry.remove_connected(&remote, &local);

    {
        let mut listener_inner = listener.inner.lock();
        listener_inner.pending.retain(|c| !Arc::ptr_eq(c, child));
        listener_inner.ack_backlog = listener_inner.ack_backlog.saturating_sub(1);
    }

    child.inner.lock().state = State::Free;
    child.wake();
}
