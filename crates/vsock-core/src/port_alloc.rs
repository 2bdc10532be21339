use std::sync::atomic::{AtomicU32, Ordering};

use codec::address::LAST_RESERVED_PORT;

/// Maximum number of candidate ports tried before a `PORT_ANY` bind gives up.
pub const MAX_PORT_RETRIES: u32 = 24;

/// Hands out ephemeral ports for `PORT_ANY` binds.
///
/// Unlike the bounded 16-bit ephemeral range a typical TCP/IP stack allocates
/// from, ports here are 32-bit and the free range is too large to represent
/// as a bitset. Allocation instead mirrors the scan loop `af_vsock.c` uses: a
/// monotonically advancing cursor starting just past the reserved range,
/// wrapping at `u32::MAX`, tried against the caller's liveness check up to
/// `MAX_PORT_RETRIES` times.
///
/// # Test
///
/// ```
/// use std::collections::HashSet;
/// use vsockd_core::port_alloc::PortAllocator;
///
/// let alloc = PortAllocator::new();
/// let mut taken = HashSet::new();
///
/// for _ in 0..4 {
///     let port = alloc.alloc(|p| !taken.contains(&p)).unwrap();
///     assert!(port > codec::address::LAST_RESERVED_PORT);
///     taken.insert(port);
/// }
///
/// assert_eq!(taken.len(), 4);
/// ```
pub struct PortAllocator {
    cursor: AtomicU32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub fn new() -> Self {
        Self { cursor: AtomicU32::new(LAST_RESERVED_PORT + 1) }
    }

    /// Scans forward from the cursor for a port satisfying `is_free`, trying
    /// at most `MAX_PORT_RETRIES` candidates. Returns `None` if none was free.
    pub fn alloc(&self, is_free: impl Fn(u32) -> bool) -> Option<u32> {
        for _ in 0..MAX_PORT_RETRIES {
            let candidate = self.cursor.fetch_add(1, Ordering::Relaxed);
            let candidate = if candidate <= LAST_RESERVED_PORT || candidate == u32::MAX {
                self.cursor.store(LAST_RESERVED_PORT + 2, Ordering::Relaxed);
                LAST_RESERVED_PORT + 1
            } else {
                candidate
            };

            if is_free(candidate) {
                return Some(candidate);
            }
        }

        None
    }
}
