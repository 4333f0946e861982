//! Datagram transport facade: one socket, reusable buffers and a multiplexed wait.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use super::buffer::PacketBuffer;
use super::error::Result;
use super::socket::SocketBinding;
use super::waker::Waker;
use crate::protocol::{self, DEFAULT_MAX_SYSEX, HEADER_SIZE, PacketHeader};

/// Transport configuration options.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest payload sent or accepted, in bytes.
    pub max_payload: usize,
    /// Optional write timeout for the socket.
    pub write_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_SYSEX,
            write_timeout: None,
        }
    }
}

/// Outcome of [`DatagramTransport::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A datagram from the given address sits in the receive buffer.
    DataReady(SocketAddr),
    /// One or more signal bits were raised through a [`Waker`].
    Signal(u32),
    /// The timeout elapsed with nothing to report.
    Timeout,
}

/// UDP endpoint owning a transmit buffer, a receive buffer and a wake channel.
#[derive(Debug)]
pub struct DatagramTransport {
    socket: SocketBinding,
    waker: Waker,
    tx: PacketBuffer,
    rx: PacketBuffer,
    read_timeout: Option<Duration>,
}

impl DatagramTransport {
    /// Bind an endpoint on the provided address.
    #[instrument(level = "info", skip(config))]
    pub fn open(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let socket = SocketBinding::bind(addr)?;
        if let Some(timeout) = config.write_timeout {
            socket.set_write_timeout(Some(timeout))?;
        }
        let local = socket.local_addr()?;
        let waker = Waker::new(local)?;
        debug!(%local, wake_source = %waker.source(), "transport bound");

        let capacity = HEADER_SIZE + config.max_payload;
        Ok(Self {
            socket,
            waker,
            tx: PacketBuffer::new(capacity),
            // one spare byte so oversized datagrams surface as a size mismatch
            rx: PacketBuffer::new(capacity + 1),
            read_timeout: None,
        })
    }

    /// Expose the local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Handle for raising signal bits from other threads.
    #[must_use]
    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    /// Encode a packet into the transmit buffer and send it to `dest`.
    #[instrument(level = "trace", skip(self, header, payload), fields(command = %header.command(), len = payload.len()))]
    pub fn send_packet(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        dest: SocketAddr,
    ) -> Result<usize> {
        self.tx.reset();
        let len = protocol::encode_into(header, payload, self.tx.as_mut_slice())?;
        self.tx.set_len(len);
        Ok(self.socket.send_to(self.tx.as_slice(), dest)?)
    }

    /// Receive the next datagram (blocking call), skipping wake datagrams.
    #[instrument(level = "trace", skip(self))]
    pub fn recv(&mut self) -> Result<(SocketAddr, &[u8])> {
        self.set_read_timeout(None)?;
        loop {
            let (len, from) = self.socket.recv_from(self.rx.as_mut_slice())?;
            if from == self.waker.source() {
                self.waker.acknowledge();
                continue;
            }
            self.rx.set_len(len);
            return Ok((from, self.rx.as_slice()));
        }
    }

    /// Wait for a datagram or a wake signal, up to `timeout` (`None` waits forever).
    ///
    /// Pending signals are reported before any datagram. After `DataReady` the datagram
    /// is available through [`received`](Self::received).
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WakeReason> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let bits = self.waker.take();
            if bits != 0 {
                return Ok(WakeReason::Signal(bits));
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WakeReason::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.set_read_timeout(remaining)?;

            self.rx.reset();
            match self.socket.recv_from(self.rx.as_mut_slice()) {
                Ok((_, from)) if from == self.waker.source() => self.waker.acknowledge(),
                Ok((len, from)) => {
                    self.rx.set_len(len);
                    return Ok(WakeReason::DataReady(from));
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    trace!(error = %err, "transient receive error");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The datagram reported by the last `DataReady`.
    #[must_use]
    pub fn received(&self) -> &[u8] {
        self.rx.as_slice()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // a zero timeout means "block forever" to the OS
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        if timeout != self.read_timeout {
            self.socket.set_read_timeout(timeout)?;
            self.read_timeout = timeout;
        }
        Ok(())
    }
}
