use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-driver traffic counters, updated by the worker and read from any thread.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    sent_packets: AtomicU64,
    received_packets: AtomicU64,
    malformed_packets: AtomicU64,
    rejected_packets: AtomicU64,
    send_errors: AtomicU64,
    dropped_messages: AtomicU64,
    invalid_midi: AtomicU64,
    lost_packets: AtomicU64,
    stale_packets: AtomicU64,
    rtt_total_us: AtomicU64,
    rtt_max_us: AtomicU64,
    rtt_samples: AtomicU64,
}

impl Stats {
    #[inline]
    pub(crate) fn record_sent(&self) {
        self.sent_packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_received(&self) {
        self.received_packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_malformed(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.rejected_packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A complete outbound message with no connected peer.
    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// An invalid byte or an oversized sysex on a port.
    #[inline]
    pub(crate) fn record_invalid_midi(&self) {
        self.invalid_midi.fetch_add(1, Ordering::Relaxed);
    }

    /// Mirror the connection's sequence counters.
    #[inline]
    pub(crate) fn set_sequence_counters(&self, lost: u64, stale: u64) {
        self.lost_packets.store(lost, Ordering::Relaxed);
        self.stale_packets.store(stale, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rtt(&self, rtt: Duration) {
        let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);
        self.rtt_total_us.fetch_add(micros, Ordering::Relaxed);
        self.rtt_samples.fetch_add(1, Ordering::Relaxed);
        update_max(&self.rtt_max_us, micros);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent_packets: self.sent_packets.load(Ordering::Relaxed),
            received_packets: self.received_packets.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            rejected_packets: self.rejected_packets.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            invalid_midi: self.invalid_midi.load(Ordering::Relaxed),
            lost_packets: self.lost_packets.load(Ordering::Relaxed),
            stale_packets: self.stale_packets.load(Ordering::Relaxed),
            rtt_total_us: self.rtt_total_us.load(Ordering::Relaxed),
            rtt_max_us: self.rtt_max_us.load(Ordering::Relaxed),
            rtt_samples: self.rtt_samples.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Point-in-time copy of the driver counters.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub sent_packets: u64,
    pub received_packets: u64,
    pub malformed_packets: u64,
    pub rejected_packets: u64,
    pub send_errors: u64,
    pub dropped_messages: u64,
    pub invalid_midi: u64,
    pub lost_packets: u64,
    pub stale_packets: u64,
    pub rtt_total_us: u64,
    pub rtt_max_us: u64,
    pub rtt_samples: u64,
}

impl StatsSnapshot {
    /// Average CLOCK round-trip time in microseconds.
    #[must_use]
    pub fn avg_rtt_us(&self) -> Option<u64> {
        if self.rtt_samples == 0 {
            return None;
        }
        Some(self.rtt_total_us / self.rtt_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.record_sent();
        stats.record_sent();
        stats.record_malformed();
        stats.set_sequence_counters(4, 1);
        stats.record_rtt(Duration::from_micros(300));
        stats.record_rtt(Duration::from_micros(100));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent_packets, 2);
        assert_eq!(snapshot.malformed_packets, 1);
        assert_eq!(snapshot.lost_packets, 4);
        assert_eq!(snapshot.stale_packets, 1);
        assert_eq!(snapshot.rtt_max_us, 300);
        assert_eq!(snapshot.avg_rtt_us(), Some(200));
        assert_eq!(StatsSnapshot::default().avg_rtt_us(), None);
    }
}
