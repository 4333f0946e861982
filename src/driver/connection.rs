//! Peer connection state machine.
//!
//! Pure protocol logic with no I/O: the owner feeds received packets and clock ticks in,
//! then drains the packets to send with [`PeerConnection::poll_transmit`].

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{Command, PacketHeader, Timestamp};

/// Link state as seen by one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No peer.
    Disconnected,
    /// Invitation sent, waiting for `INV_OK` or `INV_NO`.
    Inviting,
    /// Peer accepted; data flows.
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Inviting => "inviting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// What the owner should do with a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// MIDI data from the connected peer; hand it to the port.
    Deliver,
    /// Control packet consumed by the state machine.
    Consumed,
    /// Not acceptable in the current state or from this sender.
    Rejected,
}

/// A control packet queued for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmit {
    /// Header to send.
    pub header: PacketHeader,
    /// Destination address.
    pub dest: SocketAddr,
    echo: Option<[u8; Timestamp::SIZE]>,
}

impl Transmit {
    /// Payload bytes: the echoed ping timestamp for a CLOCK reply, empty otherwise.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.echo.as_ref().map_or(&[], |echo| echo.as_slice())
    }
}

/// Connection to at most one peer.
#[derive(Debug)]
pub struct PeerConnection {
    state: LinkState,
    peer: Option<SocketAddr>,
    interval: Duration,
    deadline: Option<Instant>,
    activity: bool,
    tx_seq: u32,
    rx_seq: u32,
    lost: u64,
    stale: u64,
    last_rtt: Option<Duration>,
    // measured by the latest CLOCK reply and not yet collected
    rtt_sample: Option<Duration>,
    outbox: VecDeque<Transmit>,
}

impl PeerConnection {
    /// Create a disconnected endpoint with a random transmit baseline.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_initial_seq(interval, random_seq())
    }

    /// Create a disconnected endpoint with an explicit transmit baseline.
    #[must_use]
    pub fn with_initial_seq(interval: Duration, tx_seq: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            peer: None,
            interval,
            deadline: None,
            activity: false,
            tx_seq,
            rx_seq: 0,
            lost: 0,
            stale: 0,
            last_rtt: None,
            rtt_sample: None,
            outbox: VecDeque::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Connected or invited peer.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether data may be exchanged.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Next keepalive or invitation deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sequence number the next sent packet will carry.
    #[must_use]
    pub const fn tx_seq(&self) -> u32 {
        self.tx_seq
    }

    /// Sequence number expected on the next packet from the peer.
    #[must_use]
    pub const fn rx_expected(&self) -> u32 {
        self.rx_seq
    }

    /// Packets presumed lost, judged by sequence gaps.
    #[must_use]
    pub const fn lost(&self) -> u64 {
        self.lost
    }

    /// Packets that arrived with an already-passed sequence number.
    #[must_use]
    pub const fn stale(&self) -> u64 {
        self.stale
    }

    /// Round-trip time measured by the last CLOCK reply.
    #[must_use]
    pub const fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Round-trip time measured since the previous call, if any.
    pub fn take_rtt_sample(&mut self) -> Option<Duration> {
        self.rtt_sample.take()
    }

    /// Take the next packet to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbox.pop_front()
    }

    /// Header for an outbound MIDI packet, with its destination. `None` unless connected.
    pub fn data_header(
        &mut self,
        command: Command,
        port: u32,
    ) -> Option<(PacketHeader, SocketAddr)> {
        let dest = self.connected_peer()?;
        let seq = self.next_seq();
        Some((PacketHeader::new(command, port, seq), dest))
    }

    /// Invite `peer`, leaving any current peer first.
    pub fn invite(&mut self, peer: SocketAddr, now: Instant) {
        if self.is_connected() {
            self.disconnect();
        }
        info!(%peer, "inviting peer");
        self.state = LinkState::Inviting;
        self.peer = Some(peer);
        self.deadline = Some(now + self.interval);
        self.queue(Command::Invite, peer);
    }

    /// Leave the current peer, telling it with `EXIT` when connected.
    pub fn disconnect(&mut self) {
        if let Some(peer) = self.connected_peer() {
            info!(%peer, "disconnecting");
            self.queue(Command::Exit, peer);
        }
        self.drop_peer();
    }

    /// Handle the keepalive or invitation deadline.
    pub fn on_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        match (self.state, self.peer) {
            (LinkState::Connected, Some(peer)) => {
                if self.activity {
                    self.activity = false;
                    self.deadline = Some(now + self.interval);
                    self.queue(Command::Clock, peer);
                } else {
                    warn!(%peer, "peer silent for a keepalive interval, dropping it");
                    self.drop_peer();
                }
            }
            (LinkState::Inviting, Some(peer)) => {
                debug!(%peer, "invitation unanswered, retrying");
                self.deadline = Some(now + self.interval);
                self.queue(Command::Invite, peer);
            }
            _ => self.drop_peer(),
        }
    }

    /// Handle a validated packet from `from`.
    pub fn on_packet(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Disposition {
        match header.command() {
            Command::Invite => {
                if self.is_connected() {
                    debug!(%from, "rejecting invitation, already connected");
                    self.outbox.push_back(Transmit {
                        header: PacketHeader::new(Command::InviteNo, 0, 0),
                        dest: from,
                        echo: None,
                    });
                } else {
                    self.accept(from, header.seq_num(), now);
                    self.queue(Command::InviteOk, from);
                }
                Disposition::Consumed
            }
            Command::InviteOk if self.is_inviting(from) => {
                self.accept(from, header.seq_num(), now);
                Disposition::Consumed
            }
            Command::InviteNo if self.is_inviting(from) => {
                warn!(peer = %from, "invitation rejected");
                self.drop_peer();
                Disposition::Consumed
            }
            Command::Exit if self.connected_peer() == Some(from) => {
                info!(peer = %from, "peer left");
                self.drop_peer();
                Disposition::Consumed
            }
            command if self.connected_peer() == Some(from) => {
                self.activity = true;
                self.track_seq(header.seq_num());
                match command {
                    Command::Clock => {
                        self.on_clock(header, payload, from);
                        Disposition::Consumed
                    }
                    Command::MidiMsg | Command::MidiSysex => Disposition::Deliver,
                    // a late INV_OK after crossed invitations
                    _ => Disposition::Consumed,
                }
            }
            command => {
                debug!(%from, %command, state = %self.state, "packet rejected");
                Disposition::Rejected
            }
        }
    }

    fn on_clock(&mut self, header: &PacketHeader, payload: &[u8], from: SocketAddr) {
        if payload.is_empty() {
            let seq = self.next_seq();
            self.outbox.push_back(Transmit {
                header: PacketHeader::new(Command::Clock, 0, seq),
                dest: from,
                echo: Some(header.timestamp().to_bytes()),
            });
        } else if let Some(sent) = Timestamp::from_bytes(payload) {
            let micros = Timestamp::now().as_micros().saturating_sub(sent.as_micros());
            let rtt = Duration::from_micros(micros);
            debug!(rtt_us = micros, "clock reply");
            self.last_rtt = Some(rtt);
            self.rtt_sample = Some(rtt);
        }
    }

    fn accept(&mut self, peer: SocketAddr, seq: u32, now: Instant) {
        info!(%peer, "connected");
        self.state = LinkState::Connected;
        self.peer = Some(peer);
        self.rx_seq = seq.wrapping_add(1);
        // the handshake counts as the first interval's activity
        self.activity = true;
        self.deadline = Some(now + self.interval);
    }

    fn track_seq(&mut self, seq: u32) {
        match sequence_gap(self.rx_seq, seq) {
            Some(gap) => {
                if gap > 0 {
                    debug!(expected = self.rx_seq, got = seq, "sequence gap");
                }
                self.lost += u64::from(gap);
                self.rx_seq = seq.wrapping_add(1);
            }
            None => self.stale += 1,
        }
    }

    fn is_inviting(&self, from: SocketAddr) -> bool {
        self.state == LinkState::Inviting && self.peer == Some(from)
    }

    fn connected_peer(&self) -> Option<SocketAddr> {
        if self.is_connected() { self.peer } else { None }
    }

    fn drop_peer(&mut self) {
        self.state = LinkState::Disconnected;
        self.peer = None;
        self.deadline = None;
        self.activity = false;
    }

    fn queue(&mut self, command: Command, dest: SocketAddr) {
        let seq = self.next_seq();
        self.outbox.push_back(Transmit {
            header: PacketHeader::new(command, 0, seq),
            dest,
            echo: None,
        });
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.tx_seq;
        self.tx_seq = seq.wrapping_add(1);
        seq
    }
}

/// Number of packets skipped between `expected` and `seq`, or `None` when `seq` is older.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub(crate) fn sequence_gap(expected: u32, seq: u32) -> Option<u32> {
    let diff = seq.wrapping_sub(expected) as i32;
    (diff >= 0).then_some(diff as u32)
}

/// Random transmit baseline.
pub(crate) fn random_seq() -> u32 {
    let uuid = Uuid::new_v4();
    let bytes = uuid.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
