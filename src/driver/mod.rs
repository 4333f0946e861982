//! Port-multiplexing driver core.
//!
//! A [`Driver`] owns one UDP socket and one worker thread. Up to [`MAX_PORTS`] logical
//! ports are opened with a [`MidiSource`] and a [`MidiSink`]; calling
//! [`Driver::activate`] (or [`Activator::activate`] from another thread) asks the worker
//! to drain a port through its parser and send each complete message to the peer.
//!
//! ```rust,no_run
//! use std::sync::Mutex;
//! use std::collections::VecDeque;
//! use midi_udp::{Driver, DriverConfig};
//!
//! let driver = Driver::start(DriverConfig::default().with_peer("192.168.1.20"))?;
//! let queue = std::sync::Arc::new(Mutex::new(VecDeque::from([0x90u8, 0x40, 0x60])));
//! let source = {
//!     let queue = queue.clone();
//!     move || queue.lock().ok()?.pop_front()
//! };
//! let port = driver.open_port(0, source, |byte: u8| println!("in: {byte:02x}"))?;
//! driver.activate(port);
//! # Ok::<(), midi_udp::DriverError>(())
//! ```

mod config;
mod connection;
mod error;
mod port;
mod stats;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{info, instrument, warn};

use crate::DEFAULT_PORT;
use crate::transport::{self, DatagramTransport, TransportConfig, Waker};

pub use config::{DEFAULT_KEEPALIVE, DriverConfig};
pub use connection::{Disposition, LinkState, PeerConnection, Transmit};
pub(crate) use connection::{random_seq, sequence_gap};
pub use error::{DriverError, Result};
pub use port::{MAX_PORTS, MidiSink, MidiSource, PortHandle};
pub use stats::StatsSnapshot;

use port::PortRegistry;
use stats::Stats;
use worker::{Control, Worker, signal};

/// Connection state published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Current state.
    pub state: LinkState,
    /// Connected or invited peer.
    pub peer: Option<SocketAddr>,
}

/// State shared between the driver handle and the worker.
#[derive(Debug)]
pub(crate) struct Shared {
    status: Mutex<LinkStatus>,
    changed: Condvar,
    pub(crate) stats: Stats,
}

impl Shared {
    fn new(status: LinkStatus) -> Self {
        Self {
            status: Mutex::new(status),
            changed: Condvar::new(),
            stats: Stats::default(),
        }
    }

    pub(crate) fn publish(&self, status: LinkStatus) {
        let mut current = self.status.lock();
        if *current != status {
            *current = status;
            drop(current);
            self.changed.notify_all();
        }
    }
}

/// Cloneable handle that marks ports as having outbound data.
///
/// Only takes the activation lock for a bit set and fires a non-blocking wake; safe to
/// call from any thread, including concurrently with [`Driver::close_port`].
#[derive(Debug, Clone)]
pub struct Activator {
    registry: Arc<PortRegistry>,
    waker: Waker,
}

impl Activator {
    /// Ask the worker to drain `port`.
    pub fn activate(&self, port: PortHandle) {
        if self.registry.mark_pending(port) {
            self.waker.wake(signal::ACTIVATE);
        }
    }
}

/// Running driver: one socket, one worker thread, up to [`MAX_PORTS`] ports.
#[derive(Debug)]
pub struct Driver {
    registry: Arc<PortRegistry>,
    shared: Arc<Shared>,
    waker: Waker,
    control: Sender<Control>,
    local_addr: SocketAddr,
    worker: Option<JoinHandle<()>>,
}

impl Driver {
    /// Bind the socket, spawn the worker and invite the configured peer.
    ///
    /// Resolution and bind failures are returned before any thread starts.
    #[instrument(level = "info", skip(config), fields(bind = %config.bind_addr))]
    pub fn start(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let bind = transport::resolve(&config.bind_addr, DEFAULT_PORT)?;
        let peer = config
            .peer_addr
            .as_deref()
            .map(|peer| transport::resolve(peer, DEFAULT_PORT))
            .transpose()?;

        let transport_config = TransportConfig {
            max_payload: config.max_sysex_size,
            ..TransportConfig::default()
        };
        let transport = DatagramTransport::open(bind, &transport_config)?;
        let local_addr = transport.local_addr()?;
        let waker = transport.waker();

        let mut connection = PeerConnection::new(config.keepalive_interval);
        if let Some(peer) = peer {
            connection.invite(peer, Instant::now());
        }
        let shared = Arc::new(Shared::new(LinkStatus {
            state: connection.state(),
            peer: connection.peer(),
        }));
        let registry = Arc::new(PortRegistry::new(config.max_sysex_size));
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let worker = Worker::new(
            transport,
            connection,
            Arc::clone(&registry),
            Arc::clone(&shared),
            control_rx,
            config.max_sysex_size,
        );
        let handle = thread::Builder::new()
            .name("midi-udp-worker".to_owned())
            .spawn(move || worker.run())
            .map_err(DriverError::Spawn)?;

        info!(%local_addr, "driver started");
        Ok(Self {
            registry,
            shared,
            waker,
            control: control_tx,
            local_addr,
            worker: Some(handle),
        })
    }

    /// Local socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bind a source and sink to port `index`.
    pub fn open_port(
        &self,
        index: usize,
        source: impl MidiSource + 'static,
        sink: impl MidiSink + 'static,
    ) -> Result<PortHandle> {
        self.registry.open(index, Arc::new(source), Arc::new(sink))
    }

    /// Close a port, first waiting for any pending or in-flight drain of it.
    ///
    /// No callback of the port runs after this returns.
    pub fn close_port(&self, port: PortHandle) {
        self.registry.close(port);
    }

    /// Whether port `index` currently has a binding.
    #[must_use]
    pub fn is_port_open(&self, index: usize) -> bool {
        self.registry.is_open(index)
    }

    /// Ask the worker to drain `port`.
    pub fn activate(&self, port: PortHandle) {
        self.activator().activate(port);
    }

    /// Cloneable activation handle for producer threads.
    #[must_use]
    pub fn activator(&self) -> Activator {
        Activator {
            registry: Arc::clone(&self.registry),
            waker: self.waker.clone(),
        }
    }

    /// Invite `peer` (`host[:port]`), leaving any current peer.
    pub fn connect(&self, peer: &str) -> Result<()> {
        let peer = transport::resolve(peer, DEFAULT_PORT)?;
        self.send_control(Control::Connect(peer))
    }

    /// Leave the current peer.
    pub fn disconnect(&self) -> Result<()> {
        self.send_control(Control::Disconnect)
    }

    /// Latest published connection state.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        *self.shared.status.lock()
    }

    /// Block until the link reaches `state` or `timeout` elapses. Returns whether it did.
    pub fn wait_for_state(&self, state: LinkState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        while status.state != state {
            if self.shared.changed.wait_until(&mut status, deadline).timed_out() {
                return status.state == state;
            }
        }
        true
    }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop the worker, sending `EXIT` to a connected peer, and wait for it to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send_control(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .map_err(|_| DriverError::WorkerGone)?;
        self.waker.wake(signal::CONTROL);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.waker.wake(signal::SHUTDOWN);
        if handle.join().is_err() {
            warn!("worker thread panicked");
            self.registry.shutdown();
        }
        info!(local_addr = %self.local_addr, "driver stopped");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
