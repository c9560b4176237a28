//! Tierbench TX
//!
//! Traffic side of the testbed. Generator cores send UDP bursts at line rate
//! following a schedule of `(duration, gap)` entries; correlator cores take
//! the telemetry packets echoed by the receive side and turn them into
//! latency samples and per-tier occupancy logs.
//!
//! ```text
//!   schedule ──► RateModel ──► per-core targets
//!                                   │
//!   TxGenerator (core c+i) ─────────┴──► NIC tx queue i ──► receiver
//!                                                              │
//!   Correlator  (core c+t+j) ◄── NIC rx queue j ◄── telemetry ─┘
//!        │
//!        ├─► latency log
//!        ├─► occupancy report
//!        └─► rate register (optional)
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod generator;
pub mod monitor;
pub mod occupancy;
pub mod packet;
pub mod rate;
pub mod register;
pub mod report;
pub mod schedule;

pub use config::{TxConfig, MAX_TX_CORES};
pub use correlator::{Correlator, CorrelatorOutput, INVALID_LATENCY};
pub use engine::TxEngine;
pub use error::{TxError, TxResult};
pub use generator::{TrafficOptions, TxGenerator};
pub use monitor::{TxInterval, TxMonitor};
pub use occupancy::{OccupancyLog, OccupancySample};
pub use packet::{MacAddr, PacketSpec};
pub use rate::RateModel;
pub use register::{RateRegister, RegisterConfig};
pub use report::{LatencySummary, TxReport};
pub use schedule::{BurstEntry, BurstSchedule};
