//! Tierbench RX
//!
//! Tiered receive pipeline. Packets land in NIC receive queues backed by
//! buffer pools on different memory tiers (local DRAM, remote NUMA nodes, a
//! CXL node); each lane polls its queues with a starvation-driven tier state
//! machine and hands bursts to a packet processor.
//!
//! # Pipeline
//!
//! ```text
//!              ┌──────────── lane i ─────────────┐
//!  NIC queues  │                                 │
//!  primary  i ─┤  TieredPoller ──► swq ──► ProcessingCore ──► telemetry tx
//!  sec-k i+kN ─┤  (core c+2i)           (core c+2i+1)
//!              └─────────────────────────────────┘
//!
//!  rtc mode:   TieredPoller + BurstProcessor on one core (c+i)
//! ```
//!
//! # Tier modes
//!
//! | Mode | Tiers | Secondary nodes |
//! |------|-------|-----------------|
//! | none | primary | - |
//! | cxl | primary + 1 | last NUMA node |
//! | numa | primary + 3 | nodes 1, 2, 3 |

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod apps;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod poller;
pub mod pools;
pub mod processor;
pub mod rtc;
pub mod swq;
pub mod tier;

pub use apps::{PacketProcessor, ProcessorConfig, ProcessorKind};
pub use config::{OpMode, RxConfig, MAX_RX_CORES};
pub use engine::{RxEngine, RxReport};
pub use error::{RxError, RxResult};
pub use monitor::{IntervalReport, RxMonitor};
pub use processor::RollingRate;
pub use tier::{QueueLayout, Tier, TierMode, TierState};
