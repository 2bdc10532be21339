use std::fmt;

/// Errors surfaced to a caller of a user-facing socket operation, named after
/// the POSIX codes they correspond to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    AddrNotAvail,
    AddrInUse,
    Acces,
    Invalid,
    AfNoSupport,
    NotConn,
    IsConn,
    Already,
    InProgress,
    DestAddrReq,
    Pipe,
    NetUnreach,
    NoMem,
    MsgSize,
    Again,
    TimedOut,
    Intr,
    /// The user-visible face of an internal protocol error: an unexpected
    /// packet arrived for the socket's current state and it was reset.
    ConnReset,
    OpNotSupp,
    NoProtoOpt,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AddrNotAvail => "address not available",
            Self::AddrInUse => "address in use",
            Self::Acces => "permission denied",
            Self::Invalid => "invalid argument",
            Self::AfNoSupport => "address family not supported",
            Self::NotConn => "socket not connected",
            Self::IsConn => "socket already connected",
            Self::Already => "operation already in progress",
            Self::InProgress => "operation in progress",
            Self::DestAddrReq => "destination address required",
            Self::Pipe => "broken pipe",
            Self::NetUnreach => "network unreachable",
            Self::NoMem => "out of memory",
            Self::MsgSize => "message too large",
            Self::Again => "resource temporarily unavailable",
            Self::TimedOut => "timed out",
            Self::Intr => "interrupted",
            Self::ConnReset => "connection reset by peer",
            Self::OpNotSupp => "operation not supported",
            Self::NoProtoOpt => "protocol not available",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
