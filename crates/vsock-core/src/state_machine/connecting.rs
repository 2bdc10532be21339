use std::sync::Arc;

use codec::packet::{Body, Packet};

use crate::error::Error;
use crate::registry::Registry;
use crate::socket::{QueuePair, Socket, State};
use crate::transport::{DatagramTransport, QueuePairTransport};

/// Handles an inbound packet for a client socket in `CONNECTING` (§4.3.3).
pub fn on_receive(
    registry: &Registry,
    datagram: &dyn DatagramTransport,
    qpt: &dyn QueuePairTransport,
    socket: &Arc<Socket>,
    packet: Packet,
) {
    match packet.body {
        Body::Negotiate { size } => {
            let (qp_min, qp_max, local, remote, already_allocated) = {
                let inner = socket.inner.lock();
                (inner.qp_min, inner.qp_max, inner.local, inner.remote, inner.qp.is_some())
            };

            // A second NEGOTIATE while a queue pair is already allocated is
            // rejected outright: re-negotiating mid-handshake is not
            // supported (§9 Open Question (b)).
            if already_allocated || size < qp_min || size > qp_max {
                let _ = datagram.send(Packet::new(local, remote, Body::Rst));
                return;
            }

            match qpt.alloc(remote.cid, size, size, false) {
                Ok(handle) => {
                    let attach_sub = qpt.subscribe_attach(handle);
                    let detach_sub = qpt.subscribe_detach(handle);

                    if datagram.send(Packet::new(local, remote, Body::Offer { handle })).is_err() {
                        qpt.unsubscribe(attach_sub);
                        qpt.unsubscribe(detach_sub);
                        qpt.detach(handle);
                        fail(socket, Error::ConnReset);
                        return;
                    }

                    let mut inner = socket.inner.lock();
                    inner.qp = Some(QueuePair { handle, produce_size: size, consume_size: size });
                    inner.attach_sub = Some(attach_sub);
                    inner.detach_sub = Some(detach_sub);
                    drop(inner);

                    registry.register_handle(handle, socket);
                }
                Err(_) => {
                    let _ = datagram.send(Packet::new(local, remote, Body::Rst));
                    fail(socket, Error::NoMem);
                }
            }
        }
        Body::Attach { handle } => {
            let matches = socket.inner.lock().qp.map(|qp| qp.handle) == Some(handle);

            if !matches {
                let _ = datagram.send(Packet::new(packet.dst, packet.src, Body::Rst));
                return;
            }

            let (local, remote) = {
                let mut inner = socket.inner.lock();
                inner.state = State::Connected;
                (inner.local, inner.remote)
            };

            registry.insert_connected(remote, local, socket.clone());
            socket.wake();
        }
        Body::Rst => fail(socket, Error::ConnReset),
        _ => {
            let _ = datagram.send(Packet::new(packet.dst, packet.src, Body::Rst));
            fail(socket, Error::ConnReset);
        }
    }
}

fn fail(socket: &Arc<Socket>, error: Error) {
    let mut inner = socket.inner.lock();
    inner.state = State::Unconnected;
    inner.error = Some(error);
    drop(inner);
    socket.wake();
}
