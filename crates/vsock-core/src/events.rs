use codec::address::Handle;

use crate::registry::Registry;
use crate::state_machine::connected;
use crate::transport::Event;

/// Dispatches a transport [`Event`] to the socket(s) it concerns (§4.2
/// "Event handlers"). Routed through the same deferred worker as control
/// packets so it can never race a state-machine handler for the same socket
/// (§9 Open Question (a)).
pub fn handle(registry: &Registry, event: Event) {
    match event {
        Event::PeerAttach(_handle) => {
            // The ATTACH control packet is what actually drives the
            // CONNECTING -> CONNECTED transition (§4.3.3); this event is
            // purely informational confirmation that the hypervisor-level
            // attach completed and requires no state change here.
        }
        Event::PeerDetach(handle) => on_detach(registry, handle),
        Event::Resumed => {
            for socket in registry.connected_sockets() {
                connected::on_peer_gone(registry, &socket);
            }
        }
    }
}

fn on_detach(registry: &Registry, handle: Handle) {
    if let Some(socket) = registry.lookup_handle(&handle) {
        connected::on_peer_gone(registry, &socket);
    }
}
