//! Command line flags and their merge onto a JSON base configuration

use clap::{Args, ValueEnum};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tierbench_rx::{OpMode, ProcessorKind, RxConfig, TierMode};
use tierbench_tx::packet::MacAddr;
use tierbench_tx::{BurstSchedule, TxConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Pipeline,
    Rtc,
}

impl From<ModeArg> for OpMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Pipeline => OpMode::Pipeline,
            ModeArg::Rtc => OpMode::Rtc,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TierArg {
    None,
    Cxl,
    Numa,
}

impl From<TierArg> for TierMode {
    fn from(t: TierArg) -> Self {
        match t {
            TierArg::None => TierMode::None,
            TierArg::Cxl => TierMode::Cxl,
            TierArg::Numa => TierMode::Numa,
        }
    }
}

/// Receive side
#[derive(Debug, Clone, Args)]
pub struct RxArgs {
    /// Base configuration (JSON); flags override it
    #[arg(long, env = "TIERBENCH_RX_CONFIG")]
    pub rx_config: Option<PathBuf>,

    /// Operation mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Secondary memory tiers
    #[arg(long, value_enum)]
    pub tier: Option<TierArg>,

    /// Receive lanes
    #[arg(long)]
    pub rx_cores: Option<u16>,

    /// First core of the receive lanes
    #[arg(long)]
    pub rx_first_core: Option<usize>,

    #[arg(long)]
    pub primary_ring: Option<usize>,

    /// Must be a power of two
    #[arg(long)]
    pub secondary_ring: Option<usize>,

    #[arg(long)]
    pub primary_pool: Option<usize>,

    #[arg(long)]
    pub secondary_pool: Option<usize>,

    /// Software queue capacity per lane
    #[arg(long)]
    pub swq_size: Option<usize>,

    /// Packets between telemetry emissions
    #[arg(long)]
    pub sample_freq: Option<u64>,

    /// Packet processor (noapp, touch, header-touch, kvs, nat, knn)
    #[arg(long)]
    pub app: Option<ProcessorKind>,

    /// Processor argument (ns per burst, table size, point count)
    #[arg(long)]
    pub app_arg: Option<u64>,

    /// Run even when the machine lacks the NUMA nodes the tier mode wants
    #[arg(long)]
    pub relaxed_numa: bool,
}

impl RxArgs {
    pub fn into_config(self, interval_ms: Option<u64>) -> anyhow::Result<RxConfig> {
        let mut cfg = match &self.rx_config {
            Some(path) => RxConfig::load(path)?,
            None => RxConfig::default(),
        };
        if let Some(v) = self.mode {
            cfg.op_mode = v.into();
        }
        if let Some(v) = self.tier {
            cfg.tier_mode = v.into();
        }
        if let Some(v) = self.rx_cores {
            cfg.rx_cores = v;
        }
        if let Some(v) = self.rx_first_core {
            cfg.first_core = v;
        }
        if let Some(v) = self.primary_ring {
            cfg.primary_ring_size = v;
        }
        if let Some(v) = self.secondary_ring {
            cfg.secondary_ring_size = v;
        }
        if let Some(v) = self.primary_pool {
            cfg.primary_pool_size = v;
        }
        if let Some(v) = self.secondary_pool {
            cfg.secondary_pool_size = v;
        }
        if let Some(v) = self.swq_size {
            cfg.swq_size = v;
        }
        if self.sample_freq.is_some() {
            cfg.sample_freq = self.sample_freq;
        }
        if let Some(v) = self.app {
            cfg.processor.kind = v;
        }
        if let Some(v) = self.app_arg {
            cfg.processor.arg = v;
        }
        if self.relaxed_numa {
            cfg.strict_numa = false;
        }
        if let Some(v) = interval_ms {
            cfg.monitor_interval_ms = v;
        }
        Ok(cfg)
    }
}

/// Transmit side
#[derive(Debug, Clone, Args)]
pub struct TxArgs {
    /// Base configuration (JSON); flags override it
    #[arg(long, env = "TIERBENCH_TX_CONFIG")]
    pub tx_config: Option<PathBuf>,

    /// Generator cores
    #[arg(long)]
    pub tx_cores: Option<u16>,

    /// Telemetry correlator cores
    #[arg(long)]
    pub corr_cores: Option<u16>,

    /// First core of the generators; correlators follow them
    #[arg(long)]
    pub tx_first_core: Option<usize>,

    /// Frame size without CRC
    #[arg(long)]
    pub packet_size: Option<usize>,

    #[arg(long)]
    pub link_gbps: Option<f64>,

    #[arg(long)]
    pub src_mac: Option<MacAddr>,

    #[arg(long)]
    pub dst_mac: Option<MacAddr>,

    #[arg(long)]
    pub src_ip: Option<Ipv4Addr>,

    #[arg(long)]
    pub dst_ip: Option<Ipv4Addr>,

    #[arg(long)]
    pub dst_port: Option<u16>,

    /// Send every other frame to this port (secondary-tier steering)
    #[arg(long)]
    pub secondary_dst_port: Option<u16>,

    /// Randomise the source address every burst
    #[arg(long)]
    pub random_src_ip: bool,

    /// Software send timestamps instead of hardware ones
    #[arg(long)]
    pub sw_timestamp: bool,

    /// Single-entry schedule: burst length
    #[arg(long)]
    pub burst_us: Option<u32>,

    /// Single-entry schedule: pause after each burst
    #[arg(long)]
    pub gap_us: Option<u32>,

    /// Schedule file of `duration gap` lines
    #[arg(long, conflicts_with_all = ["burst_us", "gap_us"])]
    pub schedule_file: Option<PathBuf>,

    #[arg(long)]
    pub latency_out: Option<PathBuf>,

    #[arg(long)]
    pub occupancy_out: Option<PathBuf>,

    /// Samples kept per correlator and per ring
    #[arg(long)]
    pub sample_cap: Option<usize>,

    /// PCI resource file holding the rate register
    #[arg(long, env = "TIERBENCH_RATE_REGISTER")]
    pub rate_register: Option<PathBuf>,

    #[arg(long, requires = "rate_register")]
    pub rate_register_offset: Option<u64>,
}

impl TxArgs {
    pub fn into_config(self, interval_ms: Option<u64>) -> anyhow::Result<TxConfig> {
        let mut cfg = match &self.tx_config {
            Some(path) => TxConfig::load(path)?,
            None => TxConfig::default(),
        };
        if let Some(v) = self.tx_cores {
            cfg.tx_cores = v;
        }
        if let Some(v) = self.corr_cores {
            cfg.rx_cores = v;
        }
        if let Some(v) = self.tx_first_core {
            cfg.first_core = v;
        }
        if let Some(v) = self.packet_size {
            cfg.packet_size = v;
        }
        if let Some(v) = self.link_gbps {
            cfg.link_gbps = v;
        }
        if let Some(v) = self.src_mac {
            cfg.src_mac = v;
        }
        if let Some(v) = self.dst_mac {
            cfg.dst_mac = v;
        }
        if let Some(v) = self.src_ip {
            cfg.src_ip = v;
        }
        if let Some(v) = self.dst_ip {
            cfg.dst_ip = v;
        }
        if let Some(v) = self.dst_port {
            cfg.dst_port = v;
        }
        if self.secondary_dst_port.is_some() {
            cfg.secondary_dst_port = self.secondary_dst_port;
        }
        cfg.random_src_ip |= self.random_src_ip;
        cfg.software_timestamp |= self.sw_timestamp;
        if self.burst_us.is_some() || self.gap_us.is_some() {
            cfg.schedule = BurstSchedule::single(self.burst_us, self.gap_us)?;
        }
        if self.schedule_file.is_some() {
            cfg.schedule_file = self.schedule_file;
        }
        if self.latency_out.is_some() {
            cfg.latency_outfile = self.latency_out;
        }
        if self.occupancy_out.is_some() {
            cfg.occupancy_outfile = self.occupancy_out;
        }
        if let Some(v) = self.sample_cap {
            cfg.sample_cap = v;
        }
        if let Some(path) = self.rate_register {
            let mut reg = cfg.rate_register.take().unwrap_or_default();
            reg.path = path;
            if let Some(off) = self.rate_register_offset {
                reg.offset = off;
            }
            cfg.rate_register = Some(reg);
        }
        if let Some(v) = interval_ms {
            cfg.monitor_interval_ms = v;
        }
        Ok(cfg)
    }
}
