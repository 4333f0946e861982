//! Driver configuration

use std::time::Duration;

use crate::DEFAULT_PORT;
use crate::protocol::{DEFAULT_MAX_SYSEX, HEADER_SIZE};

use super::error::{DriverError, Result};

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5);

/// Driver configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverConfig {
    /// Local `host[:port]` to bind.
    pub bind_addr: String,
    /// Peer `host[:port]` to invite at start; `None` waits for an invitation.
    pub peer_addr: Option<String>,
    /// Largest sysex block (delimiters included) sent or accepted.
    pub max_sysex_size: usize,
    /// Keepalive tick; a silent peer is dropped after at most two ticks.
    pub keepalive_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            peer_addr: None,
            max_sysex_size: DEFAULT_MAX_SYSEX,
            keepalive_interval: DEFAULT_KEEPALIVE,
        }
    }
}

impl DriverConfig {
    /// Set the local bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the peer to invite at start.
    #[must_use]
    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    /// Set the sysex size limit.
    #[must_use]
    pub fn with_max_sysex_size(mut self, size: usize) -> Self {
        self.max_sysex_size = size;
        self
    }

    /// Set the keepalive interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_sysex_size < 2 {
            return Err(DriverError::Config(format!(
                "max_sysex_size must hold at least the two delimiters, got {}",
                self.max_sysex_size
            )));
        }
        // stay within one UDP datagram
        if HEADER_SIZE + self.max_sysex_size > usize::from(u16::MAX) - 28 {
            return Err(DriverError::Config(format!(
                "max_sysex_size {} exceeds a single datagram",
                self.max_sysex_size
            )));
        }
        if self.keepalive_interval.is_zero() {
            return Err(DriverError::Config(
                "keepalive_interval must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}
