use std::array::TryFromSliceError;
use std::fmt;

/// Errors produced while encoding or decoding control packets.
#[derive(Debug)]
pub enum Error {
    /// The buffer is shorter than a fixed header or a declared body.
    InvalidInput,
    /// The header declares a packet type this codec does not recognize.
    UnknownType(u16),
    /// The header's `len` field does not match the type's expected body size.
    LengthMismatch,
    TryFromSliceError(TryFromSliceError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::UnknownType(ty) => write!(f, "unknown packet type: {ty}"),
            Self::LengthMismatch => write!(f, "header length field does not match body"),
            Self::TryFromSliceError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
