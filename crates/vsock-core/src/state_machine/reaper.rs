use std::sync::Arc;

use crate::registry::Registry;
use crate::socket::{Socket, State};

/// Fires one second after a server-side child was created (§4.3.5).
///
/// Three outcomes, distinguished by the child's current membership:
/// - still pending (handshake never finished): remove it everywhere and free it.
/// - accepted and not rejected: the user owns it now, nothing to do.
/// - rejected by `accept()` while still pending: same cleanup as the first case.
pub fn reap(registry: &Registry, child: &Arc<Socket>, listener: &Arc<Socket>) {
    let state = child.inner.lock().state;

    if state == State::Free {
        return;
    }

    let still_pending = listener.inner.lock().pending.iter().any(|c| Arc::ptr_eq(c, child));
    let rejected = child.inner.lock().rejected;

    if still_pending || rejected {
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
}
