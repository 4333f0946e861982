//! Blocking host-side client.
//!
//! [`HostClient`] is the initiating end of a tunnel for tools and tests: it invites a
//! driver, sends messages and sysex blocks, and receives data while keeping the link alive
//! with periodic CLOCK pings.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::DEFAULT_PORT;
use crate::driver::{random_seq, sequence_gap};
use crate::midi::MidiMessage;
use crate::protocol::{self, Command, PacketHeader, Timestamp};
use crate::transport::{self, DatagramTransport, TransportConfig, TransportError, WakeReason};

/// Errors raised by [`HostClient`].
#[derive(Error, Debug)]
pub enum HostError {
    /// Socket or resolution failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed packet from the peer.
    #[error("malformed packet: {0}")]
    Protocol(#[from] protocol::Error),

    /// No answer to the invitation.
    #[error("no invitation reply received within {0:?}")]
    NoReply(Duration),

    /// The peer answered `INV_NO`.
    #[error("invitation rejected")]
    Rejected,

    /// A reply came from an address other than the invited peer.
    #[error("wrong peer in invitation: {0}")]
    WrongPeer(SocketAddr),

    /// A packet that makes no sense at this point of the exchange.
    #[error("unexpected {0} packet")]
    Unexpected(Command),

    /// Nothing received from the peer for the idle limit.
    #[error("peer idle for {0:?}")]
    Idle(Duration),

    /// The peer sent `EXIT`.
    #[error("peer left")]
    PeerLeft,

    /// Operation requires a connection.
    #[error("not connected")]
    NotConnected,

    /// `connect` called twice.
    #[error("already connected")]
    AlreadyConnected,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, HostError>;

/// A data packet received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Logical port index.
    pub port: u32,
    /// Message bytes (1..=3) or a complete sysex block.
    pub data: Bytes,
    /// Whether `data` is a sysex block.
    pub sysex: bool,
}

/// Blocking tunnel endpoint that invites a peer.
#[derive(Debug)]
pub struct HostClient {
    transport: DatagramTransport,
    peer: SocketAddr,
    connected: bool,
    tx_seq: u32,
    rx_seq: u32,
    lost_packets: u64,
    last_rx: Instant,
    last_clock: Instant,
}

impl HostClient {
    /// Bind `local` (`host[:port]`, port defaults to ephemeral) for talking to `peer`
    /// (`host[:port]`, port defaults to 6820).
    pub fn bind(local: &str, peer: &str, max_payload: usize) -> Result<Self> {
        let local = transport::resolve(local, 0)?;
        let peer = transport::resolve(peer, DEFAULT_PORT)?;
        let config = TransportConfig {
            max_payload,
            ..TransportConfig::default()
        };
        let transport = DatagramTransport::open(local, &config)?;
        let now = Instant::now();
        Ok(Self {
            transport,
            peer,
            connected: false,
            tx_seq: 0,
            rx_seq: 0,
            lost_packets: 0,
            last_rx: now,
            last_clock: now,
        })
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Peer address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the invitation was accepted and the peer has not left.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Packets presumed lost, judged by sequence gaps.
    #[must_use]
    pub const fn lost_packets(&self) -> u64 {
        self.lost_packets
    }

    /// Invite the peer and wait up to `timeout` for its answer.
    pub fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.connected {
            return Err(HostError::AlreadyConnected);
        }

        self.tx_seq = random_seq();
        self.send(Command::Invite, 0, &[])?;
        debug!(peer = %self.peer, "invitation sent");

        let deadline = Instant::now() + timeout;
        let from = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.wait(Some(remaining))? {
                WakeReason::DataReady(from) => break from,
                WakeReason::Timeout => return Err(HostError::NoReply(timeout)),
                WakeReason::Signal(_) => {}
            }
        };
        if from != self.peer {
            return Err(HostError::WrongPeer(from));
        }

        let (header, _) = protocol::decode(self.transport.received())?;
        match header.command() {
            Command::InviteOk => {
                self.connected = true;
                self.rx_seq = header.seq_num().wrapping_add(1);
                self.last_rx = Instant::now();
                self.last_clock = self.last_rx;
                info!(peer = %self.peer, "connected");
                Ok(())
            }
            Command::InviteNo => Err(HostError::Rejected),
            command => Err(HostError::Unexpected(command)),
        }
    }

    /// Leave the peer with `EXIT`.
    pub fn disconnect(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.send(Command::Exit, 0, &[])?;
        self.connected = false;
        info!(peer = %self.peer, "disconnected");
        Ok(())
    }

    /// Send one MIDI message to `port`.
    pub fn send_msg(&mut self, port: u32, msg: &MidiMessage) -> Result<()> {
        self.ensure_connected()?;
        self.send(Command::MidiMsg, port, &msg.to_wire())
    }

    /// Send a complete sysex block (delimiters included) to `port`.
    pub fn send_sysex(&mut self, port: u32, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.send(Command::MidiSysex, port, data)
    }

    /// Receive the next data packet.
    ///
    /// Sends a CLOCK ping every `clock_interval` and fails with [`HostError::Idle`] when
    /// nothing arrives from the peer for `idle`.
    pub fn recv(&mut self, clock_interval: Duration, idle: Duration) -> Result<Received> {
        self.ensure_connected()?;
        let poll = (clock_interval / 5).max(Duration::from_millis(1));

        loop {
            let now = Instant::now();
            if now.duration_since(self.last_rx) >= idle {
                return Err(HostError::Idle(idle));
            }
            if now.duration_since(self.last_clock) >= clock_interval {
                self.send(Command::Clock, 0, &[])?;
                self.last_clock = now;
                trace!("clock ping sent");
            }

            let from = match self.transport.wait(Some(poll))? {
                WakeReason::DataReady(from) => from,
                WakeReason::Timeout | WakeReason::Signal(_) => continue,
            };
            if from != self.peer {
                debug!(%from, "ignoring packet from stranger");
                continue;
            }
            self.last_rx = Instant::now();

            let (header, payload) = protocol::decode(self.transport.received())?;
            let Some(gap) = sequence_gap(self.rx_seq, header.seq_num()) else {
                debug!(expected = self.rx_seq, got = header.seq_num(), "stale packet dropped");
                continue;
            };
            if gap > 0 {
                debug!(lost = gap, "packets lost");
            }
            self.lost_packets += u64::from(gap);
            self.rx_seq = header.seq_num().wrapping_add(1);

            match header.command() {
                Command::MidiMsg => {
                    let msg = MidiMessage::from_wire(payload)?;
                    return Ok(Received {
                        port: header.port(),
                        data: Bytes::copy_from_slice(msg.as_bytes()),
                        sysex: false,
                    });
                }
                Command::MidiSysex => {
                    return Ok(Received {
                        port: header.port(),
                        data: Bytes::copy_from_slice(payload),
                        sysex: true,
                    });
                }
                Command::Clock => {
                    if payload.is_empty() {
                        let echo = header.timestamp().to_bytes();
                        self.send(Command::Clock, 0, &echo)?;
                    } else if let Some(sent) = Timestamp::from_bytes(payload) {
                        let rtt = Timestamp::now().as_micros().saturating_sub(sent.as_micros());
                        debug!(rtt_us = rtt, "clock reply");
                    }
                }
                Command::Exit => {
                    self.connected = false;
                    return Err(HostError::PeerLeft);
                }
                command => return Err(HostError::Unexpected(command)),
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(HostError::NotConnected)
        }
    }

    fn send(&mut self, command: Command, port: u32, payload: &[u8]) -> Result<()> {
        let seq = self.tx_seq;
        self.tx_seq = seq.wrapping_add(1);
        let header = PacketHeader::new(command, port, seq);
        self.transport.send_packet(&header, payload, self.peer)?;
        Ok(())
    }
}

impl Drop for HostClient {
    fn drop(&mut self) {
        if self.connected {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_connection() {
        let mut client = HostClient::bind("127.0.0.1", "127.0.0.1:9", 256).unwrap();
        let msg = MidiMessage::new(0xF8, 0, 0).unwrap();
        assert!(matches!(client.send_msg(0, &msg), Err(HostError::NotConnected)));
        assert!(matches!(client.disconnect(), Err(HostError::NotConnected)));
        assert!(!client.is_connected());
        assert_eq!(client.peer_addr().port(), 9);
    }

    #[test]
    fn test_connect_times_out_without_peer() {
        // a bound but silent socket stands in for an absent driver
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = silent.local_addr().unwrap().to_string();
        let mut client = HostClient::bind("127.0.0.1", &peer, 256).unwrap();

        let err = client.connect(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, HostError::NoReply(_)));
        assert!(!client.is_connected());
    }
}
