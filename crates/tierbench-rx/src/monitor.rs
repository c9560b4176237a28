//! RX Monitor
//!
//! Sole cross-core reader of the lane counters. Every interval it snapshots
//! the registry, diffs against the previous snapshot and reports:
//!
//! | Field | Source |
//! |-------|--------|
//! | received | poller `received` |
//! | primary / secondary | per-ring counters, split by the queue's tier |
//! | processed | processor per-tier counts |
//! | ns per packet | processing cycles / processed |
//!
//! Counters are read without synchronising with their writers, so one
//! report may lag the cores by up to an interval.

use crate::tier::QueueLayout;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierbench_common::{CycleClock, Shutdown, StatsRegistry, StatsSnapshot};

/// Granularity of the shutdown check while waiting for the next interval
const POLL_STEP: Duration = Duration::from_millis(10);

/// One reporting interval
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalReport {
    pub elapsed_secs: f64,
    pub received: u64,
    pub primary_rx: u64,
    pub secondary_rx: u64,
    pub processed: u64,
    pub telemetry_tx: u64,
    pub ns_per_packet: f64,
    pub mpps: f64,
    pub gbps: f64,
}

/// Periodic counter reporter
pub struct RxMonitor {
    stats: Arc<StatsRegistry>,
    layout: QueueLayout,
    clock: CycleClock,
    prev: StatsSnapshot,
    last: Instant,
}

impl RxMonitor {
    pub fn new(stats: Arc<StatsRegistry>, layout: QueueLayout, clock: CycleClock) -> Self {
        let prev = stats.snapshot();
        Self {
            stats,
            layout,
            clock,
            prev,
            last: Instant::now(),
        }
    }

    /// Diff the counters against the previous call
    pub fn sample(&mut self) -> IntervalReport {
        let now = Instant::now();
        let snap = self.stats.snapshot();
        let delta = snap.delta(&self.prev);
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.prev = snap;
        self.last = now;
        self.report(&delta, elapsed)
    }

    fn report(&self, delta: &StatsSnapshot, elapsed_secs: f64) -> IntervalReport {
        let total = delta.total();
        let (mut primary_rx, mut secondary_rx) = (0, 0);
        for (queue, n) in delta.rings.iter().enumerate() {
            match self.layout.tier_of(queue as u16) {
                Some(t) if t.is_primary() => primary_rx += n,
                Some(_) => secondary_rx += n,
                None => {}
            }
        }
        let processed = total.processed();
        let ns_per_packet = if processed == 0 {
            0.0
        } else {
            self.clock.cycles_to_ns(total.processing_cycles) as f64 / processed as f64
        };
        IntervalReport {
            elapsed_secs,
            received: total.received,
            primary_rx,
            secondary_rx,
            processed,
            telemetry_tx: total.transmitted,
            ns_per_packet,
            mpps: total.packet_rate_mpps(elapsed_secs),
            gbps: total.throughput_gbps(elapsed_secs),
        }
    }

    /// Emit a report as a log event and through the metrics facade
    pub fn publish(report: &IntervalReport) {
        tracing::info!(
            received = report.received,
            primary = report.primary_rx,
            secondary = report.secondary_rx,
            processed = report.processed,
            telemetry_tx = report.telemetry_tx,
            ns_per_packet = format_args!("{:.1}", report.ns_per_packet),
            mpps = format_args!("{:.3}", report.mpps),
            gbps = format_args!("{:.3}", report.gbps),
            "rx interval"
        );
        metrics::counter!("tierbench_rx_packets").increment(report.received);
        metrics::counter!("tierbench_rx_primary_packets").increment(report.primary_rx);
        metrics::counter!("tierbench_rx_secondary_packets").increment(report.secondary_rx);
        metrics::counter!("tierbench_rx_telemetry_sent").increment(report.telemetry_tx);
        metrics::gauge!("tierbench_rx_ns_per_packet").set(report.ns_per_packet);
        metrics::gauge!("tierbench_rx_mpps").set(report.mpps);
    }

    /// Report every `interval` until shutdown
    pub fn run(mut self, interval: Duration, shutdown: &Shutdown) {
        let mut next = Instant::now() + interval;
        while shutdown.is_running() {
            let now = Instant::now();
            if now < next {
                std::thread::sleep((next - now).min(POLL_STEP));
                continue;
            }
            next += interval;
            let report = self.sample();
            Self::publish(&report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierMode;

    #[test]
    fn test_splits_rings_by_tier() {
        let layout = QueueLayout::new(2, TierMode::Cxl);
        let stats = Arc::new(StatsRegistry::new(2, layout.total_queues() as usize));
        let mut mon = RxMonitor::new(stats.clone(), layout, CycleClock::with_hz(1_000_000_000));

        stats.record_ring(0, 10);
        stats.record_ring(1, 5);
        stats.record_ring(2, 3);
        stats.record_ring(3, 1);
        stats.core(0).record_rx(15, 15 * 64);
        stats.core(1).record_rx(4, 4 * 64);
        stats.core(0).record_processing(10, 3, 1300);

        let r = mon.sample();
        assert_eq!(r.received, 19);
        assert_eq!(r.primary_rx, 15);
        assert_eq!(r.secondary_rx, 4);
        assert_eq!(r.processed, 13);
        assert!((r.ns_per_packet - 100.0).abs() < 1e-9);

        let r = mon.sample();
        assert_eq!(r.received, 0);
        assert_eq!(r.ns_per_packet, 0.0);
    }

    #[test]
    fn test_run_returns_on_shutdown() {
        let layout = QueueLayout::new(1, TierMode::None);
        let stats = Arc::new(StatsRegistry::new(1, 1));
        let mon = RxMonitor::new(stats, layout, CycleClock::with_hz(1_000_000_000));
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let h = std::thread::spawn(move || mon.run(Duration::from_millis(5), &shutdown));
        std::thread::sleep(Duration::from_millis(30));
        trigger.trigger();
        h.join().unwrap();
    }
}
