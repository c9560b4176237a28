//! TX Monitor
//!
//! Reports, every interval, what the generator cores sent:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | packets | frames accepted by the NIC |
//! | mpps | packets / elapsed |
//! | link Mb/s | frame bytes (without CRC) × 8 / elapsed |
//! | line Mb/s | on-wire bytes (CRC, preamble, IFG) × 8 / elapsed |

use crate::rate::RateModel;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierbench_common::{Shutdown, StatsRegistry, StatsSnapshot};

const POLL_STEP: Duration = Duration::from_millis(10);

/// One reporting interval
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TxInterval {
    pub elapsed_secs: f64,
    pub packets: u64,
    pub telemetry_rx: u64,
    pub mpps: f64,
    pub link_mbps: f64,
    pub line_mbps: f64,
}

impl TxInterval {
    fn compute(packets: u64, telemetry_rx: u64, elapsed_secs: f64, model: &RateModel) -> Self {
        if elapsed_secs <= 0.0 {
            return Self {
                packets,
                telemetry_rx,
                ..Default::default()
            };
        }
        let pps = packets as f64 / elapsed_secs;
        Self {
            elapsed_secs,
            packets,
            telemetry_rx,
            mpps: pps / 1e6,
            link_mbps: pps * (model.packet_size() * 8) as f64 / 1e6,
            line_mbps: pps * (model.wire_bytes() * 8) as f64 / 1e6,
        }
    }
}

/// Periodic reporter over the generator and correlator counters
pub struct TxMonitor {
    stats: Arc<StatsRegistry>,
    model: RateModel,
    tx_cores: usize,
    prev: StatsSnapshot,
    last: Instant,
}

impl TxMonitor {
    /// `stats` holds the generators first, then the correlators
    pub fn new(stats: Arc<StatsRegistry>, model: RateModel, tx_cores: usize) -> Self {
        let prev = stats.snapshot();
        Self {
            stats,
            model,
            tx_cores,
            prev,
            last: Instant::now(),
        }
    }

    pub fn sample(&mut self) -> TxInterval {
        let now = Instant::now();
        let snap = self.stats.snapshot();
        let delta = snap.delta(&self.prev);
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.prev = snap;
        self.last = now;

        let (gens, corrs) = delta.cores.split_at(self.tx_cores.min(delta.cores.len()));
        let packets = gens.iter().map(|c| c.transmitted).sum();
        let telemetry_rx = corrs.iter().map(|c| c.received).sum();
        TxInterval::compute(packets, telemetry_rx, elapsed, &self.model)
    }

    pub fn publish(report: &TxInterval) {
        tracing::info!(
            packets = report.packets,
            telemetry_rx = report.telemetry_rx,
            mpps = format_args!("{:.3}", report.mpps),
            link_mbps = format_args!("{:.1}", report.link_mbps),
            line_mbps = format_args!("{:.1}", report.line_mbps),
            "tx interval"
        );
        metrics::counter!("tierbench_tx_packets").increment(report.packets);
        metrics::counter!("tierbench_tx_telemetry_received").increment(report.telemetry_rx);
        metrics::gauge!("tierbench_tx_mpps").set(report.mpps);
        metrics::gauge!("tierbench_tx_line_mbps").set(report.line_mbps);
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
