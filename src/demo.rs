//! Exercises the socket core end to end over the loopback transport: two
//! `Core` instances stand in for two VMs, one listens, the other connects,
//! and a message is exchanged and echoed. There is no real hypervisor glue
//! in this crate (the queue-pair/datagram transports are a kernel driver's
//! job, out of scope here) so this is what `main` runs instead of binding to
//! a device.

use anyhow::{anyhow, Result};

use codec::address::Address;
use vsock_core::{loopback, ops, socket::Kind};

use crate::config::Config;

const CLIENT_CID: u32 = 4;
const SERVICE_PORT: u32 = 9000;

pub async fn run(config: &Config) -> Result<()> {
    let server_cid = config.server.local_cid;
    let qp = &config.server.queue_pair_size;

    // Sockets in this demo are always created trusted, so they can reach a
    // restricted peer regardless of what's configured; `trusted_cids` still
    // drives which peer cids land in the restricted set in the first place.
    let restricted: Vec<u32> = [CLIENT_CID].into_iter().filter(|cid| !config.server.trusted_cids.contains(cid)).collect();

    let (server, client) =
        loopback::pair_with_bounds(server_cid, CLIENT_CID, config.server.max_threads, qp.min, qp.default, qp.max, &restricted);

    let listener = server.create_socket(Kind::Stream, true);
    ops::bind(&server, &listener, Address::new(server_cid, SERVICE_PORT))?;
    ops::listen(&listener, 16)?;
    log::info!("listening on {:?}", Address::new(server_cid, SERVICE_PORT));

    let peer = client.create_socket(Kind::Stream, true);
    let connect = ops::connect(&client, &peer, Address::new(server_cid, SERVICE_PORT), None);
    let accept = ops::accept(&listener, None);

    let (connect_result, accepted) = tokio::join!(connect, accept);
    connect_result.map_err(|e| anyhow!("connect failed: {e}"))?;
    let accepted = accepted.map_err(|e| anyhow!("accept failed: {e}"))?;
    log::info!("accepted connection from {:?}", ops::getname(&accepted, true)?);

    let message = b"hello from the client";
    ops::sendmsg(&client, &peer, message, None).await.map_err(|e| anyhow!("send failed: {e}"))?;

    let mut buf = vec![0u8; message.len()];
    ops::recvmsg(&server, &accepted, &mut buf, true, false, None).await.map_err(|e| anyhow!("recv failed: {e}"))?;
    log::info!("server received: {:?}", String::from_utf8_lossy(&buf));

    ops::shutdown(&client, &peer, vsock_core::socket::shutdown::RDWR)?;
    ops::release(&client, &peer);
    ops::release(&server, &accepted);
    ops::release(&server, &listener);

    Ok(())
}
