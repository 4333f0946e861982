//! midi-udp - Tunnel up to eight MIDI ports between two endpoints over UDP
//!
//! A [`Driver`] binds one UDP socket, runs one worker thread and multiplexes its logical
//! ports over a single peer connection. Outbound bytes are parsed into complete messages
//! (running status and sysex included) and sent as fixed 24-byte-header packets; inbound
//! packets are validated and pushed into the owning port's sink.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use midi_udp::{Driver, DriverConfig, LinkState};
//! use std::time::Duration;
//!
//! let driver = Driver::start(DriverConfig::default().with_peer("10.0.0.2"))?;
//! let port = driver.open_port(0, || -> Option<u8> { None }, |byte: u8| println!("{byte:02x}"))?;
//!
//! if driver.wait_for_state(LinkState::Connected, Duration::from_secs(2)) {
//!     driver.activate(port);
//! }
//! # Ok::<(), midi_udp::DriverError>(())
//! ```
//!
//! # Layout
//!
//! - [`midi`] - running-status parser and message types
//! - [`protocol`] - packet header and codec
//! - [`transport`] - UDP socket with a wakeable wait
//! - [`driver`] - connection state machine, port registry and worker
//! - [`host`] - blocking client for the initiating side

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod driver;
pub mod host;
pub mod midi;
pub mod protocol;
pub mod transport;

pub use driver::{
    Activator, Driver, DriverConfig, DriverError, LinkState, LinkStatus, MAX_PORTS, MidiSink,
    MidiSource, PortHandle, StatsSnapshot,
};
pub use host::{HostClient, HostError, Received};
pub use midi::{MidiMessage, MidiParser, Parsed};
pub use protocol::{Command, Packet, PacketHeader};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default UDP port
pub const DEFAULT_PORT: u16 = 6820;
