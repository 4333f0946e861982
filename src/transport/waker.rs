//! Cross-thread wake signals delivered through the transport socket.
//!
//! A [`Waker`] records signal bits in an atomic mask and nudges the socket owner with an
//! empty datagram sent from a private loopback socket. The owner recognises the source
//! address, so a single blocking receive observes both datagrams and wake-ups.
//!
//! At most one wake datagram is in flight: the notified flag is set by the sender and
//! cleared only once the owner has received that datagram.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{trace, warn};

use super::socket::{SocketBinding, loopback_for};

/// Cloneable, non-blocking handle that raises signal bits on a transport.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<WakerInner>,
}

#[derive(Debug)]
struct WakerInner {
    pending: AtomicU32,
    notified: AtomicBool,
    socket: SocketBinding,
    local: SocketAddr,
    target: SocketAddr,
}

impl Waker {
    /// Create a waker for a socket bound at `target`.
    pub(crate) fn new(target: SocketAddr) -> io::Result<Self> {
        let mut target = target;
        if target.ip().is_unspecified() {
            target.set_ip(loopback_for(target.ip()));
        }
        let socket = SocketBinding::bind(SocketAddr::new(target.ip(), 0))?;
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;

        Ok(Self {
            inner: Arc::new(WakerInner {
                pending: AtomicU32::new(0),
                notified: AtomicBool::new(false),
                socket,
                local,
                target,
            }),
        })
    }

    /// Raise `bits`; never blocks.
    pub fn wake(&self, bits: u32) {
        let inner = &*self.inner;
        inner.pending.fetch_or(bits, Ordering::AcqRel);
        if inner.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = inner.socket.send_to(&[], inner.target) {
            inner.notified.store(false, Ordering::Release);
            warn!(error = %err, bits, "failed to deliver wake datagram");
        } else {
            trace!(bits, "wake datagram sent");
        }
    }

    /// Bits raised since the last call, clearing them.
    ///
    /// Leaves the notified flag alone: a wake datagram may still be in flight.
    pub(crate) fn take(&self) -> u32 {
        let inner = &*self.inner;
        if inner.pending.load(Ordering::Acquire) == 0 {
            return 0;
        }
        inner.pending.swap(0, Ordering::AcqRel)
    }

    /// Record that the wake datagram was received, so the next wake sends a new one.
    ///
    /// Must be called before the following [`take`](Self::take).
    pub(crate) fn acknowledge(&self) {
        self.inner.notified.store(false, Ordering::Release);
    }

    /// Source address of wake datagrams.
    pub(crate) fn source(&self) -> SocketAddr {
        self.inner.local
    }
}
