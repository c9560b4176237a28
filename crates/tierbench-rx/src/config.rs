//! Receive-side configuration

use crate::apps::ProcessorConfig;
use crate::error::{RxError, RxResult};
use crate::tier::TierMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tierbench_common::buffer::RX_BUFFER_SIZE;
use tierbench_common::POOL_RING_SLACK;

/// Most receive cores a run may use
pub const MAX_RX_CORES: u16 = 16;

/// Telemetry buffers reserved per core
pub const TELEMETRY_BUFFERS_PER_CORE: usize = 64;

/// How receive cores are organised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpMode {
    /// Poller and processor core pairs joined by a software queue
    #[default]
    Pipeline,
    /// One core polls and processes
    Rtc,
}

impl fmt::Display for OpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpMode::Pipeline => write!(f, "pipeline"),
            OpMode::Rtc => write!(f, "rtc"),
        }
    }
}

/// Receive engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RxConfig {
    /// Pipeline or run-to-completion
    pub op_mode: OpMode,
    /// Secondary tiers to configure
    pub tier_mode: TierMode,
    /// Receive lanes (poller/processor pairs, or rtc workers)
    pub rx_cores: u16,
    /// First logical core used by the lanes
    pub first_core: usize,
    /// Descriptors per primary receive ring
    pub primary_ring_size: usize,
    /// Descriptors per secondary receive ring (power of two)
    pub secondary_ring_size: usize,
    /// Buffers in the primary pool
    pub primary_pool_size: usize,
    /// Buffers in each secondary pool
    pub secondary_pool_size: usize,
    /// Bytes per receive buffer
    pub buffer_size: usize,
    /// Software queue capacity per lane
    pub swq_size: usize,
    /// Processed packets between telemetry emissions; `None` disables
    pub sample_freq: Option<u64>,
    /// Monitor reporting interval
    pub monitor_interval_ms: u64,
    /// Per-packet kernel
    pub processor: ProcessorConfig,
    /// Fail when the NUMA layout does not fit the tier mode
    pub strict_numa: bool,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            op_mode: OpMode::Pipeline,
            tier_mode: TierMode::None,
            rx_cores: 1,
            first_core: 1,
            primary_ring_size: 4096,
            secondary_ring_size: 128,
            primary_pool_size: 16 * 1024,
            secondary_pool_size: 4 * 1024,
            buffer_size: RX_BUFFER_SIZE,
            swq_size: 256 * 1024,
            sample_freq: None,
            monitor_interval_ms: 1000,
            processor: ProcessorConfig::default(),
            strict_numa: true,
        }
    }
}

impl RxConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> RxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> RxResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the engine cannot start with
    pub fn validate(&self) -> RxResult<()> {
        if self.rx_cores == 0 || self.rx_cores > MAX_RX_CORES {
            return Err(RxError::Config(format!(
                "rx cores must be in 1..={MAX_RX_CORES}, got {}",
                self.rx_cores
            )));
        }
        if self.primary_ring_size == 0 || self.secondary_ring_size == 0 {
            return Err(RxError::Config("ring sizes must be non-zero".into()));
        }
        if !self.secondary_ring_size.is_power_of_two() {
            return Err(RxError::Config(format!(
                "secondary ring size must be a power of two, got {}",
                self.secondary_ring_size
            )));
        }
        if self.primary_pool_size < self.primary_ring_size + POOL_RING_SLACK {
            return Err(RxError::Config(format!(
                "primary pool of {} cannot back a ring of {}",
                self.primary_pool_size, self.primary_ring_size
            )));
        }
        if self.tier_mode != TierMode::None
            && self.secondary_pool_size < self.secondary_ring_size + POOL_RING_SLACK
        {
            return Err(RxError::Config(format!(
                "secondary pool of {} cannot back a ring of {}",
                self.secondary_pool_size, self.secondary_ring_size
            )));
        }
        if self.buffer_size < tierbench_common::telemetry::HEADER_END {
            return Err(RxError::Config("buffer size below telemetry header".into()));
        }
        if self.swq_size == 0 {
            return Err(RxError::Config("software queue size must be non-zero".into()));
        }
        if self.monitor_interval_ms == 0 {
            return Err(RxError::Config("monitor interval must be non-zero".into()));
        }
        self.processor.validate()
    }

    /// Buffers in the telemetry transmit pool
    pub fn telemetry_pool_size(&self) -> usize {
        TELEMETRY_BUFFERS_PER_CORE * self.rx_cores as usize
    }

    /// Log the configuration banner
    pub fn log_banner(&self) {
        tracing::info!(
            op_mode = %self.op_mode,
            tier_mode = %self.tier_mode,
            rx_cores = self.rx_cores,
            first_core = self.first_core,
            primary_ring = self.primary_ring_size,
            secondary_ring = self.secondary_ring_size,
            buffer_size = self.buffer_size,
            sample_freq = ?self.sample_freq,
            monitor_interval_ms = self.monitor_interval_ms,
            processor = %self.processor.kind,
            processor_arg = self.processor.arg,
            "rx configuration"
        );
    }
}
