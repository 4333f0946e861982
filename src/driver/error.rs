//! Driver error types

use thiserror::Error;

use crate::transport::TransportError;

use super::port::MAX_PORTS;

/// Errors raised by the driver core
#[derive(Error, Debug)]
pub enum DriverError {
    /// Socket setup or address resolution failed
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Port index beyond the fixed port range
    #[error("port {index} out of range (max {MAX_PORTS})")]
    PortOutOfRange {
        /// Requested index
        index: usize,
    },

    /// Port already has a binding
    #[error("port {index} is already open")]
    PortInUse {
        /// Requested index
        index: usize,
    },

    /// The worker thread has exited
    #[error("worker thread is not running")]
    WorkerGone,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DriverError>;
