//! Transmit-side configuration

use crate::error::{TxError, TxResult};
use crate::occupancy::DEFAULT_SAMPLE_CAP;
use crate::packet::{self, MacAddr, PacketSpec, PRIMARY_DST_PORT};
use crate::register::RegisterConfig;
use crate::schedule::BurstSchedule;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Most generator cores a run may use
pub const MAX_TX_CORES: u16 = 16;

/// Line rate of the link under test
pub const DEFAULT_LINK_GBPS: f64 = 100.0;

/// Transmit engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Generator cores (one transmit queue each)
    pub tx_cores: u16,
    /// Correlator cores (one receive queue each)
    pub rx_cores: u16,
    /// First logical core used by the workers
    pub first_core: usize,
    /// Frame size without CRC
    pub packet_size: usize,
    pub link_gbps: f64,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    /// Destination port of primary-tier traffic
    pub dst_port: u16,
    /// When set, every other template frame uses this port instead
    pub secondary_dst_port: Option<u16>,
    /// Randomise the IPv4 source address on every burst
    pub random_src_ip: bool,
    /// Stamp cycle-counter send timestamps instead of relying on the
    /// hardware timestamps
    pub software_timestamp: bool,
    /// Inline schedule, used when no file is given
    pub schedule: BurstSchedule,
    /// File of `duration gap` lines
    pub schedule_file: Option<PathBuf>,
    /// Latency log destination
    pub latency_outfile: Option<PathBuf>,
    /// Occupancy report destination
    pub occupancy_outfile: Option<PathBuf>,
    /// Samples kept per correlator (latency) and per ring (occupancy)
    pub sample_cap: usize,
    /// Closed-loop rate register; disabled when unset
    pub rate_register: Option<RegisterConfig>,
    /// Buffers in each correlator's receive pool
    pub rx_pool_size: usize,
    pub rx_ring_size: usize,
    pub monitor_interval_ms: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            tx_cores: 1,
            rx_cores: 1,
            first_core: 1,
            packet_size: packet::MIN_FRAME_SIZE,
            link_gbps: DEFAULT_LINK_GBPS,
            src_mac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
            dst_mac: MacAddr([0x02, 0, 0, 0, 0, 0x02]),
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            dst_port: PRIMARY_DST_PORT,
            secondary_dst_port: None,
            random_src_ip: false,
            software_timestamp: false,
            schedule: BurstSchedule::default(),
            schedule_file: None,
            latency_outfile: None,
            occupancy_outfile: None,
            sample_cap: DEFAULT_SAMPLE_CAP,
            rate_register: None,
            rx_pool_size: 8192,
            rx_ring_size: 4096,
            monitor_interval_ms: 1000,
        }
    }
}

impl TxConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> TxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> TxResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> TxResult<()> {
        if self.tx_cores == 0 || self.tx_cores > MAX_TX_CORES {
            return Err(TxError::Config(format!(
                "tx cores must be in 1..={MAX_TX_CORES}, got {}",
                self.tx_cores
            )));
        }
        if self.rx_cores == 0 {
            return Err(TxError::Config("at least one correlator core".into()));
        }
        packet::check_size(self.packet_size)?;
        if !(self.link_gbps > 0.0) {
            return Err(TxError::Config(format!("link rate {} Gb/s", self.link_gbps)));
        }
        if self.rx_ring_size == 0 || self.rx_pool_size < self.rx_ring_size {
            return Err(TxError::Config(format!(
                "receive pool of {} cannot back a ring of {}",
                self.rx_pool_size, self.rx_ring_size
            )));
        }
        if self.monitor_interval_ms == 0 {
            return Err(TxError::Config("monitor interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Schedule file if given, otherwise the inline schedule
    pub fn resolve_schedule(&self) -> TxResult<BurstSchedule> {
        match &self.schedule_file {
            Some(path) => BurstSchedule::from_file(path),
            None => Ok(self.schedule.clone()),
        }
    }

    pub fn packet_spec(&self) -> PacketSpec {
        PacketSpec {
            size: self.packet_size,
            src_mac: self.src_mac,
            dst_mac: self.dst_mac,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
        }
    }

    /// Log the configuration banner
    pub fn log_banner(&self) {
        tracing::info!(
            tx_cores = self.tx_cores,
            rx_cores = self.rx_cores,
            first_core = self.first_core,
            packet_size = self.packet_size,
            link_gbps = self.link_gbps,
            src_mac = %self.src_mac,
            dst_mac = %self.dst_mac,
            src_ip = %self.src_ip,
            dst_ip = %self.dst_ip,
            timestamp = if self.software_timestamp { "sw" } else { "hw" },
            rate_register = self.rate_register.is_some(),
            "tx configuration"
        );
    }
}
