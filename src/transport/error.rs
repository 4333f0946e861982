//! Transport-level error types covering socket, resolution and packet failures.

use std::io;

use thiserror::Error;

/// Unified error type for datagram transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// Address string could not be parsed or resolved.
    #[error("cannot resolve {addr:?}: {reason}")]
    Resolve {
        /// Address as given by the caller.
        addr: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Packet encoding/decoding failure.
    #[error("packet error: {0}")]
    Protocol(#[from] crate::protocol::Error),
}

impl TransportError {
    /// Whether the error is a transient I/O condition the caller can retry past.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
            ),
            Self::Resolve { .. } | Self::Protocol(_) => false,
        }
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
