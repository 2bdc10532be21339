use std::sync::Arc;
use std::time::Instant;

use codec::address::{Address, CID_ANY, PORT_ANY};
use codec::packet::{Body, Packet};

use crate::core::Core;
use crate::error::{Error, Result};
use crate::socket::{shutdown, Kind, Socket, State};

/// Poll readiness bits returned by [`poll`].
pub mod poll_mask {
    pub const IN: u32 = 0b0001;
    pub const OUT: u32 = 0b0010;
    pub const ERR: u32 = 0b0100;
    pub const HUP: u32 = 0b1000;
}

/// Blocks until `check` returns `Some`, or `deadline` passes. `check` is
/// re-run on every wakeup and must itself re-examine socket error, state,
/// shutdown flags, and data/space availability — the order §5 "Suspension
/// points" specifies — since a wakeup only means "something changed", not
/// "the thing this call cares about changed".
async fn wait_for<T>(
    socket: &Arc<Socket>,
    deadline: Option<Instant>,
    mut check: impl FnMut() -> Option<Result<T>>,
) -> Result<T> {
    loop {
        let notified = socket.notify.notified();
        tokio::pin!(notified);

        if let Some(result) = check() {
            return result;
        }

        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::TimedOut);
                }
                if tokio::time::timeout(remaining, notified).await.is_err() {
                    return Err(Error::TimedOut);
                }
            }
            None => notified.await,
        }
    }
}

/// §4.4 "bind". `PORT_ANY` scans via [`crate::registry::Registry::allocate_any_port`];
/// an explicit reserved port requires the socket's `trusted` bit.
pub fn bind(core: &Core, socket: &Arc<Socket>, mut requested: Address) -> Result<Address> {
    let mut inner = socket.inner.lock();

    if inner.local.port != PORT_ANY {
        return Err(Error::Invalid);
    }

    if requested.cid == CID_ANY {
        requested.cid = core.local_cid();
    } else if requested.cid != core.local_cid() {
        return Err(Error::AddrNotAvail);
    }

    if requested.port == PORT_ANY {
        requested.port = core.registry().allocate_any_port(requested.cid).ok_or(Error::AddrNotAvail)?;
    } else {
        if requested.is_reserved_port() && !inner.trusted {
            return Err(Error::Acces);
        }
        if inner.kind == Kind::Stream && core.registry().is_bound(&requested) {
            return Err(Error::AddrInUse);
        }
    }

    inner.local = requested;
    let kind = inner.kind;
    drop(inner);

    if kind == Kind::Stream {
        core.registry().insert_bound(requested, socket.clone());
    }

    Ok(requested)
}

/// §4.4 "connect (stream)". Auto-binds if the socket hasn't been bound yet.
pub async fn connect(core: &Core, socket: &Arc<Socket>, dst: Address, deadline: Option<Instant>) -> Result<()> {
    if socket.inner.lock().local.port == PORT_ANY {
        bind(core, socket, Address::new(CID_ANY, PORT_ANY))?;
    }

    let (local, default_size) = {
        let mut inner = socket.inner.lock();

        match inner.state {
            State::Listen | State::Disconnecting => return Err(Error::Invalid),
            State::Connecting => return Err(Error::Already),
            State::Connected => return Err(Error::IsConn),
            _ => {}
        }

        inner.remote = dst;
        inner.state = State::Connecting;
        inner.error = None;
        (inner.local, inner.qp_default)
    };

    if core.datagram().send(Packet::new(local, dst, Body::Request { size: default_size })).is_err() {
        socket.inner.lock().state = State::Unconnected;
        return Err(Error::NetUnreach);
    }

    let result = wait_for(socket, deadline, || {
        let inner = socket.inner.lock();
        match inner.state {
            State::Connected => Some(Ok(())),
            State::Unconnected => Some(Err(inner.error.unwrap_or(Error::ConnReset))),
            _ => None,
        }
    })
    .await;

    if matches!(result, Err(Error::TimedOut)) {
        let mut inner = socket.inner.lock();
        if inner.state == State::Connecting {
            inner.state = State::Unconnected;
        }
    }

    result
}

/// §4.4 "listen". Requires the socket to already be bound and unconnected.
pub fn listen(socket: &Arc<Socket>, backlog: u32) -> Result<()> {
    let mut inner = socket.inner.lock();

    if inner.kind != Kind::Stream {
        return Err(Error::OpNotSupp);
    }

    if inner.local.port == PORT_ANY {
        return Err(Error::Invalid);
    }

    if inner.state != State::Unconnected {
        return Err(Error::Invalid);
    }

    inner.max_ack_backlog = backlog.max(1);
    inner.state = State::Listen;
    Ok(())
}

/// §4.4 "accept". Blocks until the listener's accept queue is non-empty.
pub async fn accept(socket: &Arc<Socket>, deadline: Option<Instant>) -> Result<Arc<Socket>> {
    if socket.inner.lock().state != State::Listen {
        return Err(Error::Invalid);
    }

    wait_for(socket, deadline, || {
        let mut inner = socket.inner.lock();
        inner.accept_queue.pop_front().map(Ok)
    })
    .await
}

/// §4.4 "sendmsg (stream)". Writes in a loop until `data` is exhausted, the
/// connection closes, or the deadline passes; may return fewer bytes than
/// requested if the deadline passes after partial progress.
pub async fn sendmsg(core: &Core, socket: &Arc<Socket>, data: &[u8], deadline: Option<Instant>) -> Result<usize> {
    {
        let inner = socket.inner.lock();
        if inner.state != State::Connected {
            return Err(Error::NotConn);
        }
        if inner.local_shutdown & shutdown::WR != 0 {
            return Err(Error::Pipe);
        }
    }

    let mut written = 0;

    while written < data.len() {
        let handle = {
            let inner = socket.inner.lock();
            if inner.state != State::Connected {
                break;
            }
            if inner.peer_shutdown & shutdown::RD != 0 {
                return Err(Error::Pipe);
            }
            inner.qp.map(|qp| qp.handle)
        };

        let Some(handle) = handle else {
            return Err(Error::NotConn);
        };

        if core.queue_pairs().free_space(handle) == 0 {
            wait_for(socket, deadline, || {
                let inner = socket.inner.lock();
                if inner.state != State::Connected || inner.peer_shutdown & shutdown::RD != 0 {
                    return Some(Err(Error::Pipe));
                }
                inner
                    .qp
                    .filter(|qp| core.queue_pairs().free_space(qp.handle) > 0)
                    .map(|_| Ok(()))
            })
            .await?;
            continue;
        }

        let free = core.queue_pairs().free_space(handle) as usize;
        let chunk_len = free.min(data.len() - written);
        let n = core
            .queue_pairs()
            .enqueue(handle, &data[written..written + chunk_len])
            .map_err(|_| Error::NoMem)?;

        if n == 0 {
            break;
        }

        written += n;

        let (local, remote) = {
            let inner = socket.inner.lock();
            (inner.local, inner.remote)
        };
        let _ = core.datagram().send(Packet::new(local, remote, Body::Wrote { cursor: written as u64 }));
    }

    Ok(written)
}

/// §4.4 "recvmsg (stream)". `waitall` requests the full buffer be filled
/// before returning (`MSG_WAITALL`); `peek` leaves the consume cursor
/// untouched (`MSG_PEEK`, property 10).
pub async fn recvmsg(
    core: &Core,
    socket: &Arc<Socket>,
    buf: &mut [u8],
    waitall: bool,
    peek: bool,
    deadline: Option<Instant>,
) -> Result<usize> {
    let consume_size = socket.inner.lock().qp.map(|q| q.consume_size).unwrap_or(0);
    let target = if waitall { buf.len() } else { buf.len().min(1) };

    if consume_size > 0 && target as u64 >= consume_size {
        return Err(Error::NoMem);
    }

    loop {
        let (state, handle) = {
            let inner = socket.inner.lock();
            (inner.state, inner.qp.map(|q| q.handle))
        };

        // `Unconnected` is reachable here too: a peer detach/resume or a
        // fully-drained RST drops straight to it (state_machine::connected),
        // but the handle sticks around until `release` tears it down, so a
        // caller still blocked in recvmsg needs one more pass through to
        // observe the final EOF rather than an error.
        if !matches!(state, State::Connected | State::Disconnecting | State::Unconnected) {
            return Err(Error::NotConn);
        }

        let Some(handle) = handle else {
            return Err(Error::NotConn);
        };

        let ready = core.queue_pairs().buf_ready(handle) as usize;

        if ready >= target || (ready > 0 && !waitall) {
            let to_read = ready.min(buf.len());
            let n = core.queue_pairs().dequeue(handle, &mut buf[..to_read], peek).map_err(|_| Error::NoMem)?;

            if !peek {
                let (local, remote) = {
                    let inner = socket.inner.lock();
                    (inner.local, inner.remote)
                };
                let _ = core.datagram().send(Packet::new(local, remote, Body::Read { cursor: n as u64 }));
            }

            return Ok(n);
        }

        let peer_closed_write = socket.inner.lock().peer_shutdown & shutdown::WR != 0;

        if peer_closed_write && ready == 0 {
            let mut inner = socket.inner.lock();
            if matches!(inner.state, State::Connected | State::Disconnecting) {
                inner.state = State::Unconnected;
                core.registry().remove_connected(&inner.remote, &inner.local);
            }
            drop(inner);
            socket.wake();
            return Ok(0);
        }

        wait_for(socket, deadline, || {
            let inner = socket.inner.lock();
            if inner.state != State::Connected && inner.state != State::Disconnecting {
                Some(Err(Error::NotConn))
            } else {
                None
            }
        })
        .await?;
    }
}

/// §4.4 "shutdown". `how` is a [`shutdown`] bitmask.
pub fn shutdown(core: &Core, socket: &Arc<Socket>, how: u8) -> Result<()> {
    let mut inner = socket.inner.lock();

    if inner.kind != Kind::Stream {
        return Err(Error::OpNotSupp);
    }

    inner.local_shutdown |= how;
    let (local, remote, connected) = (inner.local, inner.remote, inner.state == State::Connected);
    drop(inner);
    socket.wake();

    if connected {
        let _ = core.datagram().send(Packet::new(local, remote, Body::Shutdown { mask: how as u64 }));
    }

    Ok(())
}

/// §4.4 "poll". An unconnected stream socket with its send side still open
/// reports `OUT`, mirroring TCP semantics.
pub fn poll(socket: &Arc<Socket>) -> u32 {
    let inner = socket.inner.lock();
    let mut mask = 0;

    match inner.state {
        State::Listen => {
            if !inner.accept_queue.is_empty() {
                mask |= poll_mask::IN;
            }
        }
        State::Connected => {
            if inner.peer_shutdown & shutdown::WR != 0 || inner.local_shutdown & shutdown::RD != 0 {
                mask |= poll_mask::IN;
            }
            if inner.local_shutdown & shutdown::WR == 0 && inner.peer_shutdown & shutdown::RD == 0 {
                mask |= poll_mask::OUT;
            }
            if inner.peer_shutdown == shutdown::RDWR {
                mask |= poll_mask::HUP;
            }
        }
        State::Unconnected => mask |= poll_mask::OUT,
        State::Connecting => {}
        State::Disconnecting | State::Free => mask |= poll_mask::HUP,
    }

    if inner.error.is_some() {
        mask |= poll_mask::ERR;
    }

    mask
}

/// §4.4 "release". Tears the socket down: removes it from every table,
/// detaches its queue pair, and recursively releases any children still
/// sitting on its pending list or accept queue.
pub fn release(core: &Core, socket: &Arc<Socket>) {
    let (local, remote, kind, qp, attach_sub, detach_sub, local_shutdown) = {
        let inner = socket.inner.lock();
        (inner.local, inner.remote, inner.kind, inner.qp, inner.attach_sub, inner.detach_sub, inner.local_shutdown)
    };

    if kind == Kind::Stream {
        core.registry().remove_bound(&local);
        core.registry().remove_connected(&remote, &local);
    }

    if let Some(sub) = attach_sub {
        core.queue_pairs().unsubscribe(sub);
    }
    if let Some(sub) = detach_sub {
        core.queue_pairs().unsubscribe(sub);
    }
    if let Some(qp) = qp {
        core.registry().unregister_handle(&qp.handle);
        core.queue_pairs().detach(qp.handle);
    }

    // Tell the peer this side is gone, unless we'd already told it everything
    // (a prior explicit shutdown(RDWR)) or the handshake never produced a
    // queue pair to begin with.
    if qp.is_some() && local_shutdown != shutdown::RDWR {
        let _ = core.datagram().send(Packet::new(local, remote, Body::Shutdown { mask: shutdown::RDWR as u64 }));
    }

    let children: Vec<Arc<Socket>> = {
        let mut inner = socket.inner.lock();
        inner.state = State::Free;
        inner.pending.drain(..).chain(inner.accept_queue.drain(..)).collect()
    };

    for child in children {
        release(core, &child);
    }

    core.registry().on_socket_destroyed();
}

pub fn get_buffer_size(socket: &Arc<Socket>) -> u64 {
    socket.inner.lock().qp_default
}

pub fn get_buffer_min_size(socket: &Arc<Socket>) -> u64 {
    socket.inner.lock().qp_min
}

pub fn get_buffer_max_size(socket: &Arc<Socket>) -> u64 {
    socket.inner.lock().qp_max
}

/// §4.4 setsockopt `BUFFER_SIZE`: rejects rather than clamping, matching the
/// original, which never adjusts `qp_min`/`qp_max` to make a new default
/// fit — invariant 5 (`qp_min <= qp_default <= qp_max`) must already hold.
pub fn set_buffer_size(socket: &Arc<Socket>, value: u64) -> Result<()> {
    let mut inner = socket.inner.lock();
    if value < inner.qp_min || value > inner.qp_max {
        return Err(Error::Invalid);
    }
    inner.qp_default = value;
    Ok(())
}

pub fn set_buffer_min_size(socket: &Arc<Socket>, value: u64) -> Result<()> {
    let mut inner = socket.inner.lock();
    if value > inner.qp_default {
        return Err(Error::Invalid);
    }
    inner.qp_min = value;
    Ok(())
}

pub fn set_buffer_max_size(socket: &Arc<Socket>, value: u64) -> Result<()> {
    let mut inner = socket.inner.lock();
    if value < inner.qp_default {
        return Err(Error::Invalid);
    }
    inner.qp_max = value;
    Ok(())
}

pub fn getname(socket: &Arc<Socket>, peer: bool) -> Result<Address> {
    let inner = socket.inner.lock();
    if peer {
        if inner.state != State::Connected {
            return Err(Error::NotConn);
        }
        Ok(inner.remote)
    } else {
        Ok(inner.local)
    }
}

/// §4.4 "DGRAM bind/send/recv": thin passthrough, out of this crate's deep
/// scope beyond destination and size validation (§1).
pub fn dgram_send(core: &Core, socket: &Arc<Socket>, dst: Address, payload: &[u8]) -> Result<()> {
    let inner = socket.inner.lock();

    if inner.kind != Kind::Dgram {
        return Err(Error::OpNotSupp);
    }
    if dst.is_wildcard_cid() || dst.is_wildcard_port() {
        return Err(Error::DestAddrReq);
    }
    if payload.len() > core.datagram().max_datagram_size() {
        return Err(Error::MsgSize);
    }

    let local = inner.local;
    drop(inner);

    core.datagram().send_dgram(local, dst, payload).map_err(|_| Error::NetUnreach)
}

pub async fn dgram_recv(socket: &Arc<Socket>, buf: &mut [u8], deadline: Option<Instant>) -> Result<(usize, Address)> {
    wait_for(socket, deadline, || {
        let mut inner = socket.inner.lock();
        inner.dgram_queue.pop_front().map(|(from, data)| {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok((n, from))
        })
    })
    .await
}

/// Delivers a datagram into a DGRAM socket's inbound queue. Called by the
/// transport; not part of the user-facing surface.
pub fn deliver_dgram(socket: &Arc<Socket>, from: Address, payload: Vec<u8>) {
    socket.inner.lock().dgram_queue.push_back((from, payload));
    socket.wake();
}
