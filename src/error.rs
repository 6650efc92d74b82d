//! Error types for hashoff.
//!
//! Errors fall into three groups: configuration problems detected before
//! any network activity, connection setup failures, and protocol/I/O
//! failures on an established connection. The server confines the last
//! group to the session that hit it; everything else ends the process.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for protocol, engine and driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the socket or the input file, including partial transfers.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream cleanly between two messages.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The 4-byte type tag did not name any known message.
    #[error("unknown message tag: {0}")]
    UnknownTag(u32),

    /// A valid message arrived in a state that does not accept it.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    /// A HashRequest advertised more payload than we are willing to buffer.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: u64, max: u32 },

    /// The input file ran out before a full payload could be read.
    #[error("short file read: wanted {expected} bytes, got {actual}")]
    ShortFileRead { expected: usize, actual: usize },

    /// Client payload size bounds are inverted.
    #[error("invalid payload range: min {min} > max {max}")]
    InvalidPayloadRange { min: u32, max: u32 },

    /// The shared checksum engine lock was poisoned by a panicking session.
    #[error("checksum engine unavailable")]
    EngineUnavailable,
}

impl Error {
    /// Returns true for configuration errors that are detected before
    /// any connection is opened.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidPayloadRange { .. })
    }

    /// Returns true if the peer went away, cleanly or mid-message.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
