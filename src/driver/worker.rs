//! The network worker: owns the transport and the connection, drains ports and
//! dispatches received packets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, trace, warn};

use super::connection::{Disposition, PeerConnection};
use super::port::{MAX_PORTS, PortRegistry};
use super::stats::Stats;
use super::{LinkStatus, Shared};
use crate::midi::{MidiMessage, Parsed};
use crate::protocol::{self, Command, PacketHeader};
use crate::transport::{DatagramTransport, WakeReason};

/// Wake signal bits raised through the transport waker.
pub(crate) mod signal {
    /// Leave the loop.
    pub(crate) const SHUTDOWN: u32 = 1 << 0;
    /// One or more ports have outbound data.
    pub(crate) const ACTIVATE: u32 = 1 << 1;
    /// A [`Control`](super::Control) message is queued.
    pub(crate) const CONTROL: u32 = 1 << 2;
}

/// Requests from the creator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Connect(SocketAddr),
    Disconnect,
}

pub(crate) struct Worker {
    transport: DatagramTransport,
    connection: PeerConnection,
    registry: Arc<PortRegistry>,
    shared: Arc<Shared>,
    control: Receiver<Control>,
    max_sysex: usize,
}

impl Worker {
    pub(crate) fn new(
        transport: DatagramTransport,
        connection: PeerConnection,
        registry: Arc<PortRegistry>,
        shared: Arc<Shared>,
        control: Receiver<Control>,
        max_sysex: usize,
    ) -> Self {
        Self {
            transport,
            connection,
            registry,
            shared,
            control,
            max_sysex,
        }
    }

    pub(crate) fn run(mut self) {
        info!("worker started");
        loop {
            self.flush();
            let timeout = self
                .connection
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));

            match self.transport.wait(timeout) {
                Ok(WakeReason::Signal(bits)) => {
                    if bits & signal::CONTROL != 0 {
                        self.handle_control();
                    }
                    if bits & signal::ACTIVATE != 0 {
                        self.drain_ports();
                    }
                    if bits & signal::SHUTDOWN != 0 {
                        break;
                    }
                }
                Ok(WakeReason::DataReady(from)) => self.handle_datagram(from),
                Ok(WakeReason::Timeout) => {}
                Err(err) => {
                    warn!(error = %err, "receive failed");
                    // keep a persistent socket error from spinning the loop
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            self.connection.on_timeout(Instant::now());
        }

        self.connection.disconnect();
        self.flush();
        self.registry.shutdown();
        info!("worker stopped");
    }

    fn handle_control(&mut self) {
        while let Ok(control) = self.control.try_recv() {
            debug!(?control, "control request");
            match control {
                Control::Connect(peer) => self.connection.invite(peer, Instant::now()),
                Control::Disconnect => self.connection.disconnect(),
            }
        }
    }

    fn drain_ports(&mut self) {
        let pending = self.registry.take_pending();
        for index in 0..MAX_PORTS {
            let bit = 1u32 << index;
            if pending & bit == 0 {
                continue;
            }
            if let Some((source, mut parser)) = self.registry.checkout(index) {
                while let Some(byte) = source.pull_byte() {
                    match parser.feed(byte) {
                        Parsed::None => {}
                        Parsed::Message(msg) => {
                            self.send_midi(index, Command::MidiMsg, &msg.to_wire());
                        }
                        Parsed::Sysex(bytes) => self.send_midi(index, Command::MidiSysex, bytes),
                        Parsed::SysexTooLarge { size } => {
                            warn!(
                                index,
                                size,
                                max = parser.max_sysex(),
                                "sysex too large, dropped"
                            );
                            self.shared.stats.record_invalid_midi();
                        }
                        Parsed::Invalid(byte) => {
                            debug!(index, byte, "invalid MIDI byte");
                            self.shared.stats.record_invalid_midi();
                        }
                    }
                }
                self.registry.checkin(index, parser);
            } else {
                trace!(index, "activated port is closed, skipping");
            }
            self.registry.finish_drain(bit);
        }
    }

    fn send_midi(&mut self, index: usize, command: Command, payload: &[u8]) {
        let stats = &self.shared.stats;
        // index < MAX_PORTS
        let port = u32::try_from(index).unwrap_or(u32::MAX);
        let Some((header, dest)) = self.connection.data_header(command, port) else {
            trace!(index, %command, "not connected, message dropped");
            stats.record_dropped();
            return;
        };
        match self.transport.send_packet(&header, payload, dest) {
            Ok(_) => stats.record_sent(),
            Err(err) => {
                warn!(error = %err, %dest, "send failed");
                stats.record_send_error();
            }
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr) {
        let stats = &self.shared.stats;
        let (header, payload) = match protocol::decode(self.transport.received()) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(error = %err, %from, "malformed packet discarded");
                stats.record_malformed();
                return;
            }
        };
        stats.record_received();

        match self.connection.on_packet(&header, payload, from, Instant::now()) {
            Disposition::Consumed => {
                if let Some(rtt) = self.connection.take_rtt_sample() {
                    stats.record_rtt(rtt);
                }
            }
            Disposition::Rejected => stats.record_rejected(),
            Disposition::Deliver => {
                deliver(&self.registry, stats, &header, payload, self.max_sysex);
            }
        }
    }

    /// Send queued control packets and publish state.
    fn flush(&mut self) {
        while let Some(tx) = self.connection.poll_transmit() {
            match self.transport.send_packet(&tx.header, tx.payload(), tx.dest) {
                Ok(_) => self.shared.stats.record_sent(),
                Err(err) => {
                    warn!(
                        error = %err,
                        dest = %tx.dest,
                        command = %tx.header.command(),
                        "send failed"
                    );
                    self.shared.stats.record_send_error();
                }
            }
        }

        self.shared
            .stats
            .set_sequence_counters(self.connection.lost(), self.connection.stale());
        self.shared.publish(LinkStatus {
            state: self.connection.state(),
            peer: self.connection.peer(),
        });
    }
}

/// Validate a data packet from the peer and push it into the owning port.
fn deliver(
    registry: &PortRegistry,
    stats: &Stats,
    header: &PacketHeader,
    payload: &[u8],
    max_sysex: usize,
) {
    let index = match usize::try_from(header.port()) {
        Ok(index) if index < MAX_PORTS => index,
        _ => {
            debug!(port = header.port(), "data for port out of range");
            stats.record_rejected();
            return;
        }
    };

    let delivered = match header.command() {
        Command::MidiMsg => match MidiMessage::from_wire(payload) {
            Ok(msg) => {
                trace!(index, %msg, "message received");
                registry.deliver(index, msg.as_bytes())
            }
            Err(err) => {
                debug!(error = %err, index, "invalid message discarded");
                stats.record_invalid_midi();
                return;
            }
        },
        _ => {
            if payload.is_empty() || payload.len() > max_sysex {
                debug!(index, size = payload.len(), max_sysex, "sysex size out of range");
                stats.record_invalid_midi();
                return;
            }
            trace!(index, size = payload.len(), "sysex received");
            registry.deliver(index, payload)
        }
    };

    if !delivered {
        debug!(index, "data for closed port discarded");
        stats.record_rejected();
    }
}
