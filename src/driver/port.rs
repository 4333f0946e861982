//! Logical ports: transmit/receive capabilities, the port registry and the activation set.
//!
//! The activation lock and a slot lock are never held together by the registry. Sinks run
//! under their slot lock and may call [`Activator::activate`](super::Activator::activate),
//! which takes the activation lock; neither lock is held across network I/O.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::error::{DriverError, Result};
use crate::midi::MidiParser;

/// Number of logical ports multiplexed over one socket.
pub const MAX_PORTS: usize = 8;

/// Outbound byte feed of a port.
pub trait MidiSource: Send + Sync {
    /// Next raw MIDI byte, or `None` when no more data is ready.
    fn pull_byte(&self) -> Option<u8>;
}

/// Inbound byte consumer of a port.
pub trait MidiSink: Send + Sync {
    /// Accept one raw MIDI byte received from the peer.
    fn push_byte(&self, byte: u8);
}

impl<F> MidiSource for F
where
    F: Fn() -> Option<u8> + Send + Sync,
{
    fn pull_byte(&self) -> Option<u8> {
        self()
    }
}

impl<F> MidiSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn push_byte(&self, byte: u8) {
        self(byte);
    }
}

/// Handle to an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortHandle(u8);

impl PortHandle {
    /// Port index (0..MAX_PORTS).
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    const fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

struct Binding {
    source: Arc<dyn MidiSource>,
    sink: Arc<dyn MidiSink>,
    // taken out by the worker for the duration of a drain
    parser: Option<MidiParser>,
}

#[derive(Debug)]
struct ActivationSet {
    pending: u32,
    draining: u32,
    // ports being closed; activations of these are ignored
    closing: u32,
    alive: bool,
}

/// Fixed table of port slots plus the activation set.
pub(crate) struct PortRegistry {
    slots: [Mutex<Option<Binding>>; MAX_PORTS],
    activation: Mutex<ActivationSet>,
    idle: Condvar,
    max_sysex: usize,
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("activation", &*self.activation.lock())
            .field("max_sysex", &self.max_sysex)
            .finish_non_exhaustive()
    }
}

impl PortRegistry {
    pub(crate) fn new(max_sysex: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(None)),
            activation: Mutex::new(ActivationSet {
                pending: 0,
                draining: 0,
                closing: 0,
                alive: true,
            }),
            idle: Condvar::new(),
            max_sysex,
        }
    }

    /// Bind a source and sink to a free port.
    pub(crate) fn open(
        &self,
        index: usize,
        source: Arc<dyn MidiSource>,
        sink: Arc<dyn MidiSink>,
    ) -> Result<PortHandle> {
        let slot = self
            .slots
            .get(index)
            .ok_or(DriverError::PortOutOfRange { index })?;
        if !self.activation.lock().alive {
            return Err(DriverError::WorkerGone);
        }

        let mut slot = slot.lock();
        if slot.is_some() {
            return Err(DriverError::PortInUse { index });
        }
        *slot = Some(Binding {
            source,
            sink,
            parser: Some(MidiParser::new(self.max_sysex)),
        });
        debug!(index, "port opened");

        // index < MAX_PORTS fits in u8
        Ok(PortHandle(u8::try_from(index).unwrap_or(u8::MAX)))
    }

    /// Wait until the port is neither pending nor being drained, then unbind it.
    ///
    /// New activations of the port are ignored from the start of the call. The binding is
    /// taken under the slot lock alone, after any delivery into its sink has returned.
    pub(crate) fn close(&self, handle: PortHandle) {
        let bit = handle.bit();
        {
            let mut set = self.activation.lock();
            set.closing |= bit;
            while set.alive && (set.pending | set.draining) & bit != 0 {
                trace!(index = handle.index(), "close waiting for drain");
                self.idle.wait(&mut set);
            }
            set.pending &= !bit;
        }

        let binding = self.slots[handle.index()].lock().take();
        self.activation.lock().closing &= !bit;
        // callbacks are dropped outside both locks
        drop(binding);
        debug!(index = handle.index(), "port closed");
    }

    pub(crate) fn is_open(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.lock().is_some())
    }

    /// Mark a port as having outbound data.
    ///
    /// Returns `false` when the port is being closed or the worker is gone.
    pub(crate) fn mark_pending(&self, handle: PortHandle) -> bool {
        let bit = handle.bit();
        let mut set = self.activation.lock();
        if !set.alive || set.closing & bit != 0 {
            return false;
        }
        set.pending |= bit;
        true
    }

    /// Move every pending port into the draining set, returning the moved bits.
    pub(crate) fn take_pending(&self) -> u32 {
        let mut set = self.activation.lock();
        let pending = set.pending;
        set.draining |= pending;
        set.pending = 0;
        pending
    }

    /// Borrow the source and parser of an open port for a drain.
    pub(crate) fn checkout(&self, index: usize) -> Option<(Arc<dyn MidiSource>, MidiParser)> {
        let mut slot = self.slots.get(index)?.lock();
        let binding = slot.as_mut()?;
        let parser = binding.parser.take()?;
        Some((Arc::clone(&binding.source), parser))
    }

    /// Return a parser taken by [`checkout`](Self::checkout).
    pub(crate) fn checkin(&self, index: usize, parser: MidiParser) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        if let Some(binding) = slot.lock().as_mut() {
            binding.parser = Some(parser);
        }
    }

    /// Clear draining bits and wake idle-waiters.
    pub(crate) fn finish_drain(&self, bits: u32) {
        self.activation.lock().draining &= !bits;
        self.idle.notify_all();
    }

    /// Push received bytes into a port's sink under its slot lock.
    ///
    /// Returns `false` if the port is not open.
    pub(crate) fn deliver(&self, index: usize, bytes: &[u8]) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        let slot = slot.lock();
        let Some(binding) = slot.as_ref() else {
            return false;
        };
        for &byte in bytes {
            binding.sink.push_byte(byte);
        }
        true
    }

    /// Mark the worker gone, releasing every idle-waiter.
    pub(crate) fn shutdown(&self) {
        let mut set = self.activation.lock();
        set.alive = false;
        set.pending = 0;
        set.draining = 0;
        drop(set);
        self.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn silent_source() -> Arc<dyn MidiSource> {
        Arc::new(|| -> Option<u8> { None })
    }

    fn null_sink() -> Arc<dyn MidiSink> {
        Arc::new(|_byte: u8| {})
    }

    #[test]
    fn test_open_rejects_bad_and_duplicate_index() {
        let registry = PortRegistry::new(64);
        let handle = registry.open(3, silent_source(), null_sink()).unwrap();
        assert_eq!(handle.index(), 3);
        assert!(registry.is_open(3));

        assert!(matches!(
            registry.open(3, silent_source(), null_sink()),
            Err(DriverError::PortInUse { index: 3 })
        ));
        assert!(matches!(
            registry.open(MAX_PORTS, silent_source(), null_sink()),
            Err(DriverError::PortOutOfRange { index: 8 })
        ));

        registry.close(handle);
        assert!(!registry.is_open(3));
        assert!(registry.open(3, silent_source(), null_sink()).is_ok());
    }

    #[test]
    fn test_deliver_reaches_sink() {
        let registry = PortRegistry::new(64);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        registry
            .open(0, silent_source(), Arc::new(move |b: u8| sink.lock().push(b)))
            .unwrap();

        assert!(registry.deliver(0, &[0x90, 0x40, 0x60]));
        assert!(!registry.deliver(1, &[0xF8]));
        assert!(!registry.deliver(MAX_PORTS, &[0xF8]));
        assert_eq!(*received.lock(), vec![0x90, 0x40, 0x60]);
    }

    #[test]
    fn test_checkout_skips_closed_port() {
        let registry = PortRegistry::new(64);
        let handle = registry.open(2, silent_source(), null_sink()).unwrap();
        assert!(registry.mark_pending(handle));
        registry.take_pending();

        let (_, parser) = registry.checkout(2).unwrap();
        assert!(registry.checkout(2).is_none(), "parser is out");
        registry.checkin(2, parser);
        registry.finish_drain(handle.bit());
        registry.close(handle);

        assert!(registry.checkout(2).is_none());
    }

    #[test]
    fn test_close_waits_for_drain() {
        let registry = Arc::new(PortRegistry::new(64));
        let handle = registry.open(1, silent_source(), null_sink()).unwrap();
        registry.mark_pending(handle);
        assert_eq!(registry.take_pending(), 0b10);

        let closed = Arc::new(AtomicBool::new(false));
        let closer = {
            let registry = Arc::clone(&registry);
            let closed = Arc::clone(&closed);
            thread::spawn(move || {
                registry.close(handle);
                closed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!closed.load(Ordering::SeqCst), "close returned mid-drain");
        assert!(registry.is_open(1));

        registry.finish_drain(handle.bit());
        closer.join().unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(!registry.is_open(1));
    }

    #[test]
    fn test_close_while_sink_activates_port() {
        let registry = Arc::new(PortRegistry::new(64));
        let echo = {
            let registry = Arc::downgrade(&registry);
            Arc::new(move |_byte: u8| {
                thread::sleep(Duration::from_millis(100));
                if let Some(registry) = registry.upgrade() {
                    registry.mark_pending(PortHandle(0));
                }
            })
        };
        let handle = registry.open(0, silent_source(), echo).unwrap();

        let deliverer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.deliver(0, &[0xF8]))
        };
        thread::sleep(Duration::from_millis(20));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let closer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.close(handle);
                let _ = done_tx.send(());
            })
        };

        assert!(
            done_rx.recv_timeout(Duration::from_secs(2)).is_ok(),
            "close deadlocked against the sink"
        );
        assert!(deliverer.join().unwrap());
        closer.join().unwrap();
        assert!(!registry.is_open(0));
        assert_eq!(registry.take_pending(), 0, "activation during close is ignored");
    }

    #[test]
    fn test_close_drains_earlier_activation() {
        let registry = Arc::new(PortRegistry::new(64));
        let handle = registry.open(5, silent_source(), null_sink()).unwrap();
        assert!(registry.mark_pending(handle));

        let closer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.close(handle))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!registry.mark_pending(handle), "port is closing");
        assert!(registry.is_open(5));

        // the worker still drains what was pending before the close
        assert_eq!(registry.take_pending(), handle.bit());
        registry.finish_drain(handle.bit());
        closer.join().unwrap();
        assert!(!registry.is_open(5));

        let handle = registry.open(5, silent_source(), null_sink()).unwrap();
        assert!(registry.mark_pending(handle), "closing bit cleared");
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let registry = Arc::new(PortRegistry::new(64));
        let handle = registry.open(0, silent_source(), null_sink()).unwrap();
        registry.mark_pending(handle);

        let closer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.close(handle))
        };
        thread::sleep(Duration::from_millis(20));
        registry.shutdown();
        closer.join().unwrap();

        assert!(!registry.mark_pending(handle));
        assert!(matches!(
            registry.open(0, silent_source(), null_sink()),
            Err(DriverError::WorkerGone)
        ));
    }
}
