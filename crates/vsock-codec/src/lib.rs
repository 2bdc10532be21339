//! ## Control packet wire format
//!
//! The control channel between two endpoints of a connection-oriented socket
//! carries a small set of fixed-layout packets: the three-way handshake
//! (`Request`/`Negotiate`/`Offer`/`Attach`), teardown (`Rst`/`Shutdown`), and
//! flow-control notifications (`Wrote`/`Read`/`Waiting*`). This crate only
//! knows how to encode and decode that header and body; it has no notion of
//! sockets, state machines, or tables.

pub mod address;
pub mod packet;

mod error;

pub use error::Error;
