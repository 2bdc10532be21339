use std::time::Duration;

use anyhow::Result;

use codec::address::Address;
use vsockd_core::socket::{shutdown, Kind};
use vsockd_core::transport::Event;
use vsockd_core::{loopback, ops};

const SERVER_CID: u32 = 3;
const CLIENT_CID: u32 = 4;
const PORT: u32 = 1234;

/// S1 — a client connects to a listening server and the handshake completes
/// on both sides.
#[tokio::test]
async fn simple_handshake() -> Result<()> {
    let (server, client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 4)?;

    let peer = client.create_socket(Kind::Stream, true);
    let (connect, accept) = tokio::join!(
        ops::connect(&client, &peer, Address::new(SERVER_CID, PORT), None),
        ops::accept(&listener, None),
    );

    connect.unwrap();
    let accepted = accept.unwrap();

    assert_eq!(ops::getname(&peer, true).unwrap(), Address::new(SERVER_CID, PORT));
    assert_eq!(ops::getname(&accepted, true).unwrap().cid, CLIENT_CID);
    Ok(())
}

/// S2 — backlog overflow: two REQUESTs arrive before the listener's only
/// pending slot is accepted; the first is admitted, the second is reset.
///
/// Drives `listener::on_receive` directly with a reply sink (see
/// `Swallow` below) rather than a real peer core: a NEGOTIATE bounced back
/// through a second core with nothing bound at the fake client address
/// would itself reflect an RST into the freshly created pending child,
/// freeing its backlog slot before this test could observe it occupied.
#[tokio::test]
async fn backlog_overflow() -> Result<()> {
    let (server, _client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 1)?;

    let request = |port: u32| {
        codec::packet::Packet::new(
            Address::new(CLIENT_CID, port),
            Address::new(SERVER_CID, PORT),
            codec::packet::Body::Request { size: 65536 },
        )
    };

    vsockd_core::state_machine::listener::on_receive(server.registry(), &Swallow, &listener, Address::new(CLIENT_CID, 5001), request(5001));
    vsockd_core::state_machine::listener::on_receive(server.registry(), &Swallow, &listener, Address::new(CLIENT_CID, 5002), request(5002));

    assert_eq!(listener.inner.lock().pending.len(), 1);
    assert_eq!(listener.inner.lock().ack_backlog, 1);
    Ok(())
}

struct Swallow;

impl vsockd_core::transport::DatagramTransport for Swallow {
    fn local_cid(&self) -> u32 {
        SERVER_CID
    }

    fn is_restricted(&self, _cid: u32) -> bool {
        false
    }

    fn send(&self, _packet: codec::packet::Packet) -> vsockd_core::error::Result<()> {
        Ok(())
    }

    fn max_datagram_size(&self) -> usize {
        4096
    }

    fn send_dgram(&self, _local: Address, _dst: Address, _payload: &[u8]) -> vsockd_core::error::Result<()> {
        Ok(())
    }
}

/// S3 — a child whose handshake stalls right after NEGOTIATE (no OFFER ever
/// arrives) is reaped one second later, freeing its ack_backlog slot.
///
/// Drives `listener::on_receive` directly with a reply sink that swallows
/// the NEGOTIATE, rather than going through a real peer core — nothing here
/// needs to see that reply, and routing it through a second core would just
/// bounce an unroutable RST back in.
#[tokio::test]
async fn pending_reap_frees_backlog_slot() -> Result<()> {
    let (server, _client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 1)?;

    let request = codec::packet::Packet::new(
        Address::new(CLIENT_CID, 9999),
        Address::new(SERVER_CID, PORT),
        codec::packet::Body::Request { size: 65536 },
    );

    vsockd_core::state_machine::listener::on_receive(server.registry(), &Swallow, &listener, request.src, request);

    assert_eq!(listener.inner.lock().pending.len(), 1);
    assert_eq!(listener.inner.lock().ack_backlog, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(listener.inner.lock().pending.len(), 0);
    assert_eq!(listener.inner.lock().ack_backlog, 0);
    Ok(())
}

/// S4 — a clean bilateral close: shutdown(WR) drains to EOF, then release
/// sends the final RDWR shutdown and the peer's recvmsg returns 0.
#[tokio::test]
async fn clean_close() -> Result<()> {
    let (server, client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 4)?;

    let peer = client.create_socket(Kind::Stream, true);
    let (connect, accept) = tokio::join!(
        ops::connect(&client, &peer, Address::new(SERVER_CID, PORT), None),
        ops::accept(&listener, None),
    );
    connect.unwrap();
    let accepted = accept.unwrap();

    ops::sendmsg(&client, &peer, b"bye", None).await.unwrap();
    ops::shutdown(&client, &peer, shutdown::WR).unwrap();

    let mut buf = [0u8; 3];
    let n = ops::recvmsg(&server, &accepted, &mut buf, true, false, None).await.unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf, b"bye");

    let n = ops::recvmsg(&server, &accepted, &mut buf, false, false, None).await.unwrap();
    assert_eq!(n, 0);

    ops::release(&server, &accepted);

    let mut buf = [0u8; 1];
    let n = ops::recvmsg(&client, &peer, &mut buf, false, false, None).await.unwrap();
    assert_eq!(n, 0);
    Ok(())
}

/// S5 — an abortive peer detach marks both shutdown directions and wakes
/// anyone blocked in recvmsg with EOF.
#[tokio::test]
async fn abortive_peer_detach() -> Result<()> {
    let (server, client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 4)?;

    let peer = client.create_socket(Kind::Stream, true);
    let (connect, accept) = tokio::join!(
        ops::connect(&client, &peer, Address::new(SERVER_CID, PORT), None),
        ops::accept(&listener, None),
    );
    connect.unwrap();
    let accepted = accept.unwrap();

    let handle = accepted.inner.lock().qp.unwrap().handle;
    server.on_event(Event::PeerDetach(handle));

    let mut buf = [0u8; 1];
    let n = ops::recvmsg(&server, &accepted, &mut buf, false, false, Some(std::time::Instant::now() + Duration::from_secs(1))).await.unwrap();
    assert_eq!(n, 0);
    Ok(())
}

/// S6 — a VM resume event is treated as peer-detach for every connected
/// socket.
#[tokio::test]
async fn resume_detaches_every_connected_socket() -> Result<()> {
    let (server, client) = loopback::pair(SERVER_CID, CLIENT_CID, 2);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(SERVER_CID, PORT))?;
    ops::listen(&listener, 4)?;

    let peer = client.create_socket(Kind::Stream, true);
    let (connect, accept) = tokio::join!(
        ops::connect(&client, &peer, Address::new(SERVER_CID, PORT), None),
        ops::accept(&listener, None),
    );
    connect.unwrap();
    let accepted = accept.unwrap();

    server.on_event(Event::Resumed);

    let mut buf = [0u8; 1];
    let n = ops::recvmsg(&server, &accepted, &mut buf, false, false, Some(std::time::Instant::now() + Duration::from_secs(1))).await.unwrap();
    assert_eq!(n, 0);
    Ok(())
}
