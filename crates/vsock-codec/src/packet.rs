use bytes::{Buf, BufMut, BytesMut};

use crate::address::{Address, Handle};
use crate::Error;

const HEADER_SIZE: usize = 24;

/// The body carried by a control packet, one variant per handshake/teardown
/// message named in the wire protocol.
///
/// `Wrote`/`Read`/`WaitingRead`/`WaitingWrite` are flow-control notifications
/// exchanged once a queue pair fills or drains; they carry an opaque cursor
/// rather than a size because the receiving side only needs to know "more
/// room became available" or "more data became available", not by how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    Request { size: u64 },
    Negotiate { size: u64 },
    Offer { handle: Handle },
    Attach { handle: Handle },
    Rst,
    Shutdown { mask: u64 },
    Invalid,
    Wrote { cursor: u64 },
    Read { cursor: u64 },
    WaitingRead { cursor: u64 },
    WaitingWrite { cursor: u64 },
}

impl Body {
    fn type_tag(&self) -> u16 {
        match self {
            Self::Request { .. } => 0,
            Self::Negotiate { .. } => 1,
            Self::Offer { .. } => 2,
            Self::Attach { .. } => 3,
            Self::Rst => 4,
            Self::Shutdown { .. } => 5,
            Self::Invalid => 6,
            Self::Wrote { .. } => 7,
            Self::Read { .. } => 8,
            Self::WaitingRead { .. } => 9,
            Self::WaitingWrite { .. } => 10,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::Request { .. } | Self::Negotiate { .. } => 8,
            Self::Offer { .. } | Self::Attach { .. } => 8,
            Self::Rst | Self::Invalid => 0,
            Self::Shutdown { .. } => 8,
            Self::Wrote { .. } | Self::Read { .. } | Self::WaitingRead { .. } | Self::WaitingWrite { .. } => 8,
        }
    }
}

/// A fully decoded control packet: source, destination, and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub src: Address,
    pub dst: Address,
    pub body: Body,
}

impl Packet {
    pub fn new(src: Address, dst: Address, body: Body) -> Self {
        Self { src, dst, body }
    }

    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use vsockd_codec::address::Address;
    /// use vsockd_codec::packet::{Body, Packet};
    ///
    /// let pkt = Packet::new(
    ///     Address::new(7, 100),
    ///     Address::new(3, 200),
    ///     Body::Request { size: 65536 },
    /// );
    ///
    /// let mut buf = BytesMut::with_capacity(64);
    /// pkt.encode(&mut buf);
    ///
    /// let decoded = Packet::decode(&buf[..]).unwrap();
    /// assert_eq!(decoded, pkt);
    /// ```
    pub fn encode(self, bytes: &mut BytesMut) {
        bytes.clear();
        bytes.put_u32(self.src.cid);
        bytes.put_u32(self.src.port);
        bytes.put_u32(self.dst.cid);
        bytes.put_u32(self.dst.port);
        bytes.put_u16(self.body.type_tag());
        bytes.put_u16(0);
        bytes.put_u32(self.body.body_len() as u32);

        match self.body {
            Body::Request { size } | Body::Negotiate { size } => bytes.put_u64(size),
            Body::Offer { handle } | Body::Attach { handle } => {
                bytes.put_u32(handle.context);
                bytes.put_u32(handle.resource);
            }
            Body::Shutdown { mask } => bytes.put_u64(mask),
            Body::Wrote { cursor }
            | Body::Read { cursor }
            | Body::WaitingRead { cursor }
            | Body::WaitingWrite { cursor } => bytes.put_u64(cursor),
            Body::Rst | Body::Invalid => {}
        }
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidInput);
        }

        let src = Address::new(bytes.get_u32(), bytes.get_u32());
        let dst = Address::new(bytes.get_u32(), bytes.get_u32());
        let type_tag = bytes.get_u16();
        let _pad = bytes.get_u16();
        let len = bytes.get_u32() as usize;

        if len > bytes.len() {
            return Err(Error::InvalidInput);
        }

        let body = match type_tag {
            0 | 1 if len == 8 => {
                let size = bytes.get_u64();
                if type_tag == 0 {
                    Body::Request { size }
                } else {
                    Body::Negotiate { size }
                }
            }
            2 | 3 if len == 8 => {
                let handle = Handle { context: bytes.get_u32(), resource: bytes.get_u32() };
                if type_tag == 2 {
                    Body::Offer { handle }
                } else {
                    Body::Attach { handle }
                }
            }
            4 if len == 0 => Body::Rst,
            5 if len == 8 => Body::Shutdown { mask: bytes.get_u64() },
            6 if len == 0 => Body::Invalid,
            7 if len == 8 => Body::Wrote { cursor: bytes.get_u64() },
            8 if len == 8 => Body::Read { cursor: bytes.get_u64() },
            9 if len == 8 => Body::WaitingRead { cursor: bytes.get_u64() },
            10 if len == 8 => Body::WaitingWrite { cursor: bytes.get_u64() },
            0..=10 => return Err(Error::LengthMismatch),
            other => return Err(Error::UnknownType(other)),
        };

        Ok(Self { src, dst, body })
    }
}
