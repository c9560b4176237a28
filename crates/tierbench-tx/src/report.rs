//! End-of-run report and output files
//!
//! The latency file holds one latency in ns per line, correlator by
//! correlator; samples without a usable timestamp are left out and only
//! counted. The occupancy file is the merged [`OccupancyLog`] report.

use crate::correlator::{CorrelatorOutput, INVALID_LATENCY};
use crate::error::TxResult;
use crate::occupancy::OccupancyLog;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Distribution of the valid latencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min_ns: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

impl LatencySummary {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a u64>) -> Self {
        let mut valid: Vec<u64> = samples
            .into_iter()
            .copied()
            .filter(|l| *l != INVALID_LATENCY)
            .collect();
        if valid.is_empty() {
            return Self::default();
        }
        valid.sort_unstable();
        let at = |q: f64| valid[((valid.len() - 1) as f64 * q).round() as usize];
        Self {
            count: valid.len(),
            min_ns: valid[0],
            p50_ns: at(0.5),
            p99_ns: at(0.99),
            max_ns: valid[valid.len() - 1],
        }
    }
}

/// Transmit-side summary
#[derive(Debug, Clone, Serialize)]
pub struct TxReport {
    pub elapsed_secs: f64,
    /// Packets sent per generator core
    pub sent: Vec<u64>,
    /// Schedule entries completed per generator core
    pub bursts: Vec<u64>,
    pub telemetry_rx: u64,
    pub invalid_latencies: u64,
    pub latency: LatencySummary,
    pub occupancy_samples: usize,
    pub register_errors: u64,
}

impl TxReport {
    pub fn total_sent(&self) -> u64 {
        self.sent.iter().sum()
    }

    pub fn log(&self) {
        let total = self.total_sent();
        tracing::info!(
            elapsed_secs = format_args!("{:.2}", self.elapsed_secs),
            sent = total,
            telemetry_rx = self.telemetry_rx,
            invalid_latencies = self.invalid_latencies,
            occupancy_samples = self.occupancy_samples,
            register_errors = self.register_errors,
            "tx totals"
        );
        for (core, (n, b)) in self.sent.iter().zip(&self.bursts).enumerate() {
            let share = if total == 0 {
                0.0
            } else {
                *n as f64 * 100.0 / total as f64
            };
            tracing::info!(
                core,
                sent = n,
                bursts = b,
                share = format_args!("{share:.2}%"),
                "tx core"
            );
        }
        if self.latency.count > 0 {
            tracing::info!(
                samples = self.latency.count,
                min_ns = self.latency.min_ns,
                p50_ns = self.latency.p50_ns,
                p99_ns = self.latency.p99_ns,
                max_ns = self.latency.max_ns,
                "latency"
            );
        }
    }
}

/// Write every valid latency, one per line
pub fn write_latencies(path: &Path, outputs: &[CorrelatorOutput]) -> TxResult<usize> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for o in outputs {
        for l in o.latencies.iter().filter(|l| **l != INVALID_LATENCY) {
            writeln!(out, "{l}")?;
            written += 1;
        }
    }
    out.flush()?;
    tracing::info!(path = %path.display(), samples = written, "latency log written");
    Ok(written)
}

/// Write the occupancy report
pub fn write_occupancy(path: &Path, log: &OccupancyLog) -> TxResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    log.write_report(&mut out)?;
    out.flush()?;
    tracing::info!(path = %path.display(), samples = log.len(), "occupancy report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::OccupancySample;

    fn output(lane: u16, latencies: Vec<u64>) -> CorrelatorOutput {
        CorrelatorOutput {
            lane,
            invalid: latencies.iter().filter(|l| **l == INVALID_LATENCY).count() as u64,
            latencies,
            occupancy: OccupancyLog::new(10),
            register_errors: 0,
        }
    }

    #[test]
    fn test_summary_skips_invalid() {
        let s = LatencySummary::from_samples(&[300, INVALID_LATENCY, 100, 200]);
        assert_eq!(s.count, 3);
        assert_eq!(s.min_ns, 100);
        assert_eq!(s.p50_ns, 200);
        assert_eq!(s.max_ns, 300);
        assert_eq!(LatencySummary::from_samples(&[INVALID_LATENCY]).count, 0);
    }

    #[test]
    fn test_latency_file() {
        let path = std::env::temp_dir().join(format!("tierbench-lat-{}.txt", std::process::id()));
        let outputs = [
            output(0, vec![10, INVALID_LATENCY, 30]),
            output(1, vec![20]),
        ];
        assert_eq!(write_latencies(&path, &outputs).unwrap(), 3);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(text, "10\n30\n20\n");
    }

    #[test]
    fn test_occupancy_file() {
        let path = std::env::temp_dir().join(format!("tierbench-occ-{}.txt", std::process::id()));
        let mut log = OccupancyLog::new(4);
        log.record(
            1,
            OccupancySample {
                sample: 3,
                rx_timestamp_ns: 8,
                primary_processed: 2,
                secondary_processed: 0,
            },
        );
        write_occupancy(&path, &log).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.starts_with("------ For RX_Index 1 ------\n"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_total_sent() {
        let r = TxReport {
            elapsed_secs: 1.0,
            sent: vec![5, 7],
            bursts: vec![1, 1],
            telemetry_rx: 0,
            invalid_latencies: 0,
            latency: LatencySummary::default(),
            occupancy_samples: 0,
            register_errors: 0,
        };
        assert_eq!(r.total_sent(), 12);
    }
}
