use std::sync::Arc;

use codec::address::Address;
use codec::packet::{Body, Packet};

use crate::registry::Registry;
use crate::socket::{Kind, Socket, State};
use crate::transport::DatagramTransport;

/// Handles an inbound packet addressed to a listening socket (§4.3.1).
///
/// Only reached for a fresh `REQUEST` — a retransmitted or out-of-order
/// packet for a child already in the listener's pending list is routed
/// straight to that child (it is reachable through the connected index) and
/// handled by [`super::pending::on_receive`] instead.
pub fn on_receive(
    registry: &Registry,
    datagram: &dyn DatagramTransport,
    listener: &Arc<Socket>,
    src: Address,
    packet: Packet,
) {
    let Body::Request { size: requested_size } = packet.body else {
        let _ = datagram.send(Packet::new(packet.dst, src, Body::Rst));
        return;
    };

    if requested_size == 0 {
        let _ = datagram.send(Packet::new(packet.dst, src, Body::Rst));
        return;
    }

    let (trusted, qp_min, qp_max, chosen) = {
        let mut inner = listener.inner.lock();

        if inner.state != State::Listen {
            let _ = datagram.send(Packet::new(packet.dst, src, Body::Rst));
            return;
        }

        if inner.ack_backlog >= inner.max_ack_backlog {
            let _ = datagram.send(Packet::new(packet.dst, src, Body::Rst));
            return;
        }

        let chosen = if requested_size >= inner.qp_min && requested_size <= inner.qp_max {
            requested_size
        } else {
            inner.qp_default
        };

        inner.ack_backlog += 1;
        (inner.trusted, inner.qp_min, inner.qp_max, chosen)
    };

    if datagram.send(Packet::new(packet.dst, src, Body::Negotiate { size: chosen })).is_err() {
        listener.inner.lock().ack_backlog -= 1;
        return;
    }

    let child = Socket::new(Kind::Stream, trusted, qp_min, chosen, qp_max);
    {
        let mut child_inner = child.inner.lock();
        child_inner.local = packet.dst;
        child_inner.remote = src;
        child_inner.state = State::Connecting;
        child_inner.listener = Some(Arc::downgrade(listener));
    }

    registry.on_socket_created();
    registry.insert_connected(src, packet.dst, child.clone());

    listener.inner.lock().pending.push(child.clone());
    registry.schedule_reap(&child, listener);
}
