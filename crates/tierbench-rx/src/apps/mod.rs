//! Packet Processors
//!
//! Swappable per-packet kernels. The pipeline only calls
//! [`PacketProcessor::process`] once per received datagram and never looks
//! inside. Every processing core gets its own instance; state shared between
//! cores (the key-value table) brings its own lock.

mod header_touch;
mod knn;
mod kvs;
mod nat;
mod touch;

pub use header_touch::HeaderTouch;
pub use knn::Knn;
pub use kvs::{Kvs, KvsTable};
pub use nat::Nat;
pub use touch::Touch;

use crate::error::{RxError, RxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tierbench_common::CycleClock;

/// Per-packet kernel
pub trait PacketProcessor: Send {
    /// Run the kernel over one packet
    fn process(&mut self, pkt: &mut [u8]);

    /// Called once after every burst
    fn end_burst(&mut self) {}

    /// Human-readable counters for the end-of-run report
    fn stats(&self) -> String {
        String::from("no stats")
    }
}

/// Kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorKind {
    /// Free the packet untouched
    #[default]
    NoApp,
    /// Read every cache line, then busy-wait per burst
    Touch,
    /// Histogram UDP ports
    HeaderTouch,
    /// Shared key-value store
    Kvs,
    /// Source address translation
    Nat,
    /// Nearest-neighbour classification
    Knn,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorKind::NoApp => "noapp",
            ProcessorKind::Touch => "touch",
            ProcessorKind::HeaderTouch => "header-touch",
            ProcessorKind::Kvs => "kvs",
            ProcessorKind::Nat => "nat",
            ProcessorKind::Knn => "knn",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ProcessorKind {
    type Err = RxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noapp" | "none" => Ok(ProcessorKind::NoApp),
            "touch" => Ok(ProcessorKind::Touch),
            "header-touch" | "headertouch" => Ok(ProcessorKind::HeaderTouch),
            "kvs" => Ok(ProcessorKind::Kvs),
            "nat" => Ok(ProcessorKind::Nat),
            "knn" => Ok(ProcessorKind::Knn),
            other => Err(RxError::Config(format!("unknown processor {other}"))),
        }
    }
}

/// Kernel with its single numeric argument
///
/// | Kind | `arg` |
/// |------|-------|
/// | touch | busy-wait per burst (ns) |
/// | kvs | key pool size |
/// | nat | translation table size |
/// | knn | reference point count |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub kind: ProcessorKind,
    pub arg: u64,
}

impl ProcessorConfig {
    pub fn validate(&self) -> RxResult<()> {
        match self.kind {
            ProcessorKind::Kvs | ProcessorKind::Nat | ProcessorKind::Knn if self.arg == 0 => {
                Err(RxError::Config(format!("{} needs a non-zero argument", self.kind)))
            }
            _ => Ok(()),
        }
    }
}

struct NoApp;

impl PacketProcessor for NoApp {
    #[inline(always)]
    fn process(&mut self, _pkt: &mut [u8]) {}
}

/// One processor per core
pub fn build_processors(
    cfg: &ProcessorConfig,
    cores: usize,
    clock: CycleClock,
) -> RxResult<Vec<Box<dyn PacketProcessor>>> {
    cfg.validate()?;
    let kvs_table = match cfg.kind {
        ProcessorKind::Kvs => Some(Arc::new(KvsTable::new(cfg.arg))),
        _ => None,
    };

    let mut out: Vec<Box<dyn PacketProcessor>> = Vec::with_capacity(cores);
    for _ in 0..cores {
        let p: Box<dyn PacketProcessor> = match cfg.kind {
            ProcessorKind::NoApp => Box::new(NoApp),
            ProcessorKind::Touch => Box::new(Touch::new(cfg.arg, clock)),
            ProcessorKind::HeaderTouch => Box::new(HeaderTouch::default()),
            ProcessorKind::Kvs => match &kvs_table {
                Some(t) => Box::new(Kvs::new(t.clone())),
                None => return Err(RxError::Config("kvs table missing".into())),
            },
            ProcessorKind::Nat => Box::new(Nat::new(cfg.arg as usize)),
            ProcessorKind::Knn => Box::new(Knn::new(cfg.arg as usize)),
        };
        out.push(p);
    }
    tracing::info!(processor = %cfg.kind, arg = cfg.arg, cores, "packet processors ready");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("KVS".parse::<ProcessorKind>().unwrap(), ProcessorKind::Kvs);
        assert_eq!(
            "header-touch".parse::<ProcessorKind>().unwrap(),
            ProcessorKind::HeaderTouch
        );
        assert!("bm25".parse::<ProcessorKind>().is_err());
    }

    #[test]
    fn test_zero_arg_rejected() {
        let cfg = ProcessorConfig {
            kind: ProcessorKind::Nat,
            arg: 0,
        };
        assert!(build_processors(&cfg, 1, CycleClock::with_hz(1_000_000_000)).is_err());
    }

    #[test]
    fn test_one_instance_per_core() {
        let cfg = ProcessorConfig {
            kind: ProcessorKind::Kvs,
            arg: 16,
        };
        let procs = build_processors(&cfg, 3, CycleClock::with_hz(1_000_000_000)).unwrap();
        assert_eq!(procs.len(), 3);
        assert!(procs[0].stats().contains("keys: 16"));
    }
}
