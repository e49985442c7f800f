use std::sync::atomic::{AtomicU64, Ordering};

/// Steady-state datapath counters. These are the only visibility into error
/// and drop rates; individual failures are counted, never propagated.
#[derive(Default)]
pub struct Counters {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_dropped: AtomicU64,
    tx_errors: AtomicU64,
    passed: AtomicU64,
    dropped: AtomicU64,
    redirected: AtomicU64,
    retransmitted: AtomicU64,
    retransmit_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
    pub passed: u64,
    pub dropped: u64,
    pub redirected: u64,
    pub retransmitted: u64,
    pub retransmit_dropped: u64,
}

impl Counters {
    pub(crate) fn count_rx_packet(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn count_tx_packet(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// An unmappable packet counts both as dropped and as a hard error.
    pub(crate) fn count_tx_mapping_failure(&self) {
        self.tx_dropped.fetch_add(1, Ordering::Relaxed);
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_pass(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_redirect(&self) {
        self.redirected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_retransmit(&self) {
        self.retransmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_retransmit_drop(&self) {
        self.retransmit_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            retransmitted: self.retransmitted.load(Ordering::Relaxed),
            retransmit_dropped: self.retransmit_dropped.load(Ordering::Relaxed),
        }
    }
}
