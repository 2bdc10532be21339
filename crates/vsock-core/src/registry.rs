use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use codec::address::{Address, Handle};

use crate::port_alloc::PortAllocator;
use crate::socket::Socket;
use crate::table::Table;

/// How long a server-side pending child is given to complete the handshake
/// before the reaper collects it (§4.3.5, `af_vsock.c`'s
/// `compat_schedule_delayed_work(&vpending->dwork, HZ)`).
const REAP_DELAY: Duration = Duration::from_secs(1);

struct ReapEntry {
    deadline: Instant,
    child: Weak<Socket>,
    listener: Weak<Socket>,
}

/// The process-wide container for every table and counter this core needs:
/// bound sockets, connected sockets, the port allocator, and the live-socket
/// count. Replaces the hidden global/static mutable state `af_vsock.c` keeps
/// behind its own ad-hoc locks (§9 "Global mutable state") with one
/// explicitly constructed, explicitly torn-down owner.
///
/// # Test
///
/// ```
/// use vsockd_core::registry::Registry;
/// use vsockd_core::socket::{Kind, Socket};
/// use codec::address::Address;
///
/// let registry = Registry::new(100, 1);
/// let socket = Socket::new(Kind::Stream, false, 128, 65536, 262144);
/// registry.insert_bound(Address::new(1, 200), socket.clone());
///
/// assert_eq!(registry.live_sockets(), 1);
/// assert!(registry.lookup_bound(&Address::new(1, 200)).is_some());
///
/// registry.remove_bound(&Address::new(1, 200));
/// drop(socket);
/// assert_eq!(registry.live_sockets(), 0);
/// ```
pub struct Registry {
    local_cid: u32,
    bound: RwLock<Table<Address, Arc<Socket>>>,
    connected: RwLock<Table<(Address, Address), Arc<Socket>>>,
    port_alloc: PortAllocator,
    reap_queue: Mutex<Vec<ReapEntry>>,
    socket_count: std::sync::atomic::AtomicU64,
    /// Reverse lookup from a queue-pair handle to the socket that owns it,
    /// used to route `PEER_ATTACH`/`PEER_DETACH` events (§4.2's "Event
    /// handlers").
    handles: RwLock<Table<Handle, Weak<Socket>>>,
}

impl Registry {
    /// Constructs a registry and spawns its pending-socket reaper thread.
    /// Mirrors `SessionManager::new`'s background sweep: a `Weak` back into
    /// the registry, woken every second, dies quietly once every strong
    /// reference is gone.
    pub fn new(local_cid: u32, _max_threads: usize) -> Arc<Self> {
        let registry = Arc::new(Self {
            local_cid,
            bound: RwLock::new(Table::default()),
            connected: RwLock::new(Table::default()),
            port_alloc: PortAllocator::new(),
            reap_queue: Mutex::new(Vec::new()),
            socket_count: std::sync::atomic::AtomicU64::new(0),
            handles: RwLock::new(Table::default()),
        });

        let weak = Arc::downgrade(&registry);
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_millis(250));

                let Some(registry) = weak.upgrade() else {
                    break;
                };

                registry.sweep_reap_queue();
            }
        });

        registry
    }

    pub fn local_cid(&self) -> u32 {
        self.local_cid
    }

    pub fn live_sockets(&self) -> u64 {
        self.socket_count.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn on_socket_created(&self) {
        self.socket_count.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    pub fn on_socket_destroyed(&self) {
        self.socket_count.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }

    pub fn insert_bound(&self, addr: Address, socket: Arc<Socket>) {
        self.bound.write().insert(addr, socket);
    }

    pub fn remove_bound(&self, addr: &Address) -> Option<Arc<Socket>> {
        self.bound.write().remove(addr)
    }

    pub fn lookup_bound(&self, addr: &Address) -> Option<Arc<Socket>> {
        self.bound.read().get(addr).cloned()
    }

    pub fn is_bound(&self, addr: &Address) -> bool {
        self.bound.read().contains_key(addr)
    }

    pub fn insert_connected(&self, src: Address, dst: Address, socket: Arc<Socket>) {
        self.connected.write().insert((src, dst), socket);
    }

    pub fn remove_connected(&self, src: &Address, dst: &Address) -> Option<Arc<Socket>> {
        self.connected.write().remove(&(*src, *dst))
    }

    pub fn lookup_connected(&self, src: &Address, dst: &Address) -> Option<Arc<Socket>> {
        self.connected.read().get(&(*src, *dst)).cloned()
    }

    /// Allocates an ephemeral port for a `PORT_ANY` bind (§4.4 "bind"),
    /// scanning until one is not already present in the bound table.
    pub fn allocate_any_port(&self, cid: u32) -> Option<u32> {
        self.port_alloc.alloc(|port| !self.is_bound(&Address::new(cid, port)))
    }

    /// Schedules `child` for reaping one second from now unless it has by
    /// then been accepted or destroyed (§4.3.5).
    pub fn schedule_reap(&self, child: &Arc<Socket>, listener: &Arc<Socket>) {
        self.reap_queue.lock().push(ReapEntry {
            deadline: Instant::now() + REAP_DELAY,
            child: Arc::downgrade(child),
            listener: Arc::downgrade(listener),
        });
    }

    pub fn register_handle(&self, handle: Handle, socket: &Arc<Socket>) {
        self.handles.write().insert(handle, Arc::downgrade(socket));
    }

    pub fn unregister_handle(&self, handle: &Handle) {
        self.handles.write().remove(handle);
    }

    pub fn lookup_handle(&self, handle: &Handle) -> Option<Arc<Socket>> {
        self.handles.read().get(handle).and_then(Weak::upgrade)
    }

    /// A snapshot of every socket currently in the connected index, used to
    /// broadcast a `QP_RESUMED` event to all of them (§8 scenario S6).
    pub fn connected_sockets(&self) -> Vec<Arc<Socket>> {
        self.connected.read().values().cloned().collect()
    }

    fn sweep_reap_queue(&self) {
        let now = Instant::now();
        let mut queue = self.reap_queue.lock();

        queue.retain(|entry| {
            if entry.deadline > now {
                return true;
            }

            if let (Some(child), Some(listener)) = (entry.child.upgrade(), entry.listener.upgrade()) {
                crate::state_machine::reaper::reap(self, &child, &listener);
            }

            false
        });
    }
}
