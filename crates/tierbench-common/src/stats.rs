//! Pipeline Statistics
//!
//! Per-core counters written only by their owning core. The monitor is the
//! sole cross-core reader: it takes snapshots and diffs consecutive ones.
//! Counters only grow, so an interval diff never underflows and the diffs of
//! consecutive snapshots add up to the total since start.

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-core counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct CoreCounters {
    /// Packets received by the poller
    pub received: AtomicU64,
    /// Bytes received by the poller
    pub rx_bytes: AtomicU64,
    /// Packets transmitted (telemetry on RX, traffic on TX)
    pub transmitted: AtomicU64,
    /// Transmit attempts the NIC refused
    pub tx_failed: AtomicU64,
    /// Cycles spent inside the packet processor
    pub processing_cycles: AtomicU64,
    /// Cycles spent in non-empty polls
    pub polling_cycles: AtomicU64,
    /// Packets processed out of the primary tier
    pub primary_processed: AtomicU64,
    /// Packets processed out of any secondary tier
    pub secondary_processed: AtomicU64,
}

impl CoreCounters {
    #[inline(always)]
    pub fn record_rx(&self, packets: u64, bytes: u64) {
        self.received.fetch_add(packets, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_polling(&self, cycles: u64) {
        self.polling_cycles.fetch_add(cycles, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_tx(&self, packets: u64) {
        self.transmitted.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_tx_failure(&self) {
        self.tx_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_processing(&self, primary: u64, secondary: u64, cycles: u64) {
        self.primary_processed.fetch_add(primary, Ordering::Relaxed);
        self.secondary_processed.fetch_add(secondary, Ordering::Relaxed);
        self.processing_cycles.fetch_add(cycles, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoreCountersSnapshot {
        CoreCountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
            processing_cycles: self.processing_cycles.load(Ordering::Relaxed),
            polling_cycles: self.polling_cycles.load(Ordering::Relaxed),
            primary_processed: self.primary_processed.load(Ordering::Relaxed),
            secondary_processed: self.secondary_processed.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot (non-atomic)
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreCountersSnapshot {
    pub received: u64,
    pub rx_bytes: u64,
    pub transmitted: u64,
    pub tx_failed: u64,
    pub processing_cycles: u64,
    pub polling_cycles: u64,
    pub primary_processed: u64,
    pub secondary_processed: u64,
}

impl CoreCountersSnapshot {
    /// Change since `prev`
    pub fn delta(&self, prev: &Self) -> Self {
        Self {
            received: self.received.wrapping_sub(prev.received),
            rx_bytes: self.rx_bytes.wrapping_sub(prev.rx_bytes),
            transmitted: self.transmitted.wrapping_sub(prev.transmitted),
            tx_failed: self.tx_failed.wrapping_sub(prev.tx_failed),
            processing_cycles: self.processing_cycles.wrapping_sub(prev.processing_cycles),
            polling_cycles: self.polling_cycles.wrapping_sub(prev.polling_cycles),
            primary_processed: self.primary_processed.wrapping_sub(prev.primary_processed),
            secondary_processed: self
                .secondary_processed
                .wrapping_sub(prev.secondary_processed),
        }
    }

    /// Add another snapshot into this one
    pub fn accumulate(&mut self, other: &Self) {
        self.received += other.received;
        self.rx_bytes += other.rx_bytes;
        self.transmitted += other.transmitted;
        self.tx_failed += other.tx_failed;
        self.processing_cycles += other.processing_cycles;
        self.polling_cycles += other.polling_cycles;
        self.primary_processed += other.primary_processed;
        self.secondary_processed += other.secondary_processed;
    }

    /// Packets processed across both tier groups
    pub fn processed(&self) -> u64 {
        self.primary_processed + self.secondary_processed
    }

    /// Mean processing cost per packet in cycles
    pub fn cycles_per_packet(&self) -> f64 {
        let n = self.processed();
        if n == 0 {
            return 0.0;
        }
        self.processing_cycles as f64 / n as f64
    }

    pub fn packet_rate_mpps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }
        self.received as f64 / (elapsed_secs * 1_000_000.0)
    }

    pub fn throughput_gbps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }
        (self.rx_bytes as f64 * 8.0) / (elapsed_secs * 1_000_000_000.0)
    }
}

/// Counters for every core plus one receive counter per NIC ring
pub struct StatsRegistry {
    cores: Vec<CoreCounters>,
    rings: Vec<CachePadded<AtomicU64>>,
}

impl StatsRegistry {
    pub fn new(num_cores: usize, num_rings: usize) -> Self {
        Self {
            cores: (0..num_cores).map(|_| CoreCounters::default()).collect(),
            rings: (0..num_rings)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Counters of core `idx`
    pub fn core(&self, idx: usize) -> &CoreCounters {
        &self.cores[idx]
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn num_rings(&self) -> usize {
        self.rings.len()
    }

    /// Count packets received from `ring`; unknown rings are ignored
    #[inline(always)]
    pub fn record_ring(&self, ring: u16, packets: u64) {
        if let Some(c) = self.rings.get(ring as usize) {
            c.fetch_add(packets, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cores: self.cores.iter().map(CoreCounters::snapshot).collect(),
            rings: self.rings.iter().map(|r| r.load(Ordering::Relaxed)).collect(),
        }
    }
}

/// Snapshot of a whole registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Per-core counters
    pub cores: Vec<CoreCountersSnapshot>,
    /// Per-ring receive counts
    pub rings: Vec<u64>,
}

impl StatsSnapshot {
    /// Change since `prev`
    pub fn delta(&self, prev: &Self) -> Self {
        let zero = CoreCountersSnapshot::default();
        Self {
            cores: self
                .cores
                .iter()
                .enumerate()
                .map(|(i, c)| c.delta(prev.cores.get(i).unwrap_or(&zero)))
                .collect(),
            rings: self
                .rings
                .iter()
                .enumerate()
                .map(|(i, r)| r.wrapping_sub(prev.rings.get(i).copied().unwrap_or(0)))
                .collect(),
        }
    }

    /// Sum over all cores
    pub fn total(&self) -> CoreCountersSnapshot {
        let mut total = CoreCountersSnapshot::default();
        for c in &self.cores {
            total.accumulate(c);
        }
        total
    }

    /// Share of received packets per ring, in percent
    pub fn ring_shares(&self) -> Vec<f64> {
        let sum: u64 = self.rings.iter().sum();
        self.rings
            .iter()
            .map(|r| {
                if sum == 0 {
                    0.0
                } else {
                    *r as f64 * 100.0 / sum as f64
                }
            })
            .collect()
    }
}
