//! Tierbench Common
//!
//! Leaves shared by the receive and transmit sides of the tiered packet
//! testbed.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      tierbench-common                        │
//! │                                                              │
//! │  buffer     PacketBuffer / BufferPool (per tier, per node)   │
//! │  clock      cycle counter, calibration, busy-wait pacing     │
//! │  telemetry  fixed-offset measurement header after L2-L4      │
//! │  nic        NicPort trait + in-memory LoopbackPort           │
//! │  stats      per-core counters, snapshot / diff               │
//! │  shutdown   process-wide cooperative stop flag               │
//! │  affinity   core pinning, NUMA node lookup                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ownership
//!
//! | Object | Owner | Transfer |
//! |--------|-------|----------|
//! | `PacketBuffer` | exactly one stage | by value (poller → queue → processor → pool) |
//! | `CoreCounters` | writing core | monitor reads snapshots only |
//! | `Shutdown` | signal thread sets | every loop polls |

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod affinity;
pub mod buffer;
pub mod clock;
pub mod error;
pub mod nic;
pub mod shutdown;
pub mod stats;
pub mod telemetry;

pub use buffer::{BufferPool, PacketBuffer};
pub use clock::CycleClock;
pub use error::{CommonError, CommonResult};
pub use nic::{HwStamp, LoopbackPort, NicPort, Steering};
pub use shutdown::Shutdown;
pub use stats::{CoreCounters, CoreCountersSnapshot, StatsRegistry, StatsSnapshot};
pub use telemetry::{TelemetryHeader, MAGIC, UNUSED_SAMPLE};

/// Packets moved per NIC operation
pub const BURST_SIZE: usize = 32;

/// Buffers a pool must hold beyond the ring it backs
pub const POOL_RING_SLACK: usize = 32;
