//! The connection-oriented stream socket core: address/table bookkeeping,
//! the handshake and teardown state machine, and the user-facing socket
//! operations built on top of them. The wire format itself lives in
//! `vsockd-codec`; this crate is everything the control-plane dispatcher and
//! a caller's `bind`/`connect`/`accept`/... calls touch.

pub mod core;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod loopback;
pub mod ops;
pub mod port_alloc;
pub mod registry;
pub mod socket;
pub mod state_machine;
pub mod table;
pub mod transport;

pub use core::Core;
pub use error::{Error, Result};
pub use socket::{Kind, Socket, State};
pub use transport::{DatagramTransport, Event, QueuePairTransport};
