//! Error types for the wire codec.

use core::fmt;

/// Errors from encoding or parsing CMUX frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Payload exceeds the single-byte length encoding (127 bytes).
    PayloadTooLong(usize),
    /// DLCI outside the 6-bit address space.
    InvalidDlci(u8),
    /// Frame shorter than the fixed envelope.
    TooShort { min: usize, actual: usize },
    /// Missing SOF delimiter at either end.
    MissingDelimiter,
    /// Length field disagrees with the byte count.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::PayloadTooLong(len) => {
                write!(f, "payload of {len} bytes exceeds the 127-byte frame limit")
            }
            FrameError::InvalidDlci(dlci) => write!(f, "invalid DLCI: {dlci}"),
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::MissingDelimiter => write!(f, "missing SOF delimiter"),
            FrameError::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "length field expects a {expected}-byte frame, got {actual}"
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}
