//! RX Engine
//!
//! Brings up the tier pools, lays out the receive queues, spawns the pinned
//! lane threads and collects the end-of-run report.
//!
//! Core assignment, with `c = first_core`:
//!
//! | Mode | Thread | Core |
//! |------|--------|------|
//! | pipeline | poller of lane i | c + 2i |
//! | pipeline | processor of lane i | c + 2i + 1 |
//! | rtc | worker of lane i | c + i |
//!
//! The monitor runs on the calling thread ([`RxEngine::run_monitor`]).

use crate::apps::{build_processors, PacketProcessor};
use crate::config::{OpMode, RxConfig};
use crate::error::{RxError, RxResult};
use crate::monitor::RxMonitor;
use crate::poller::TieredPoller;
use crate::pools::{init_tier_pools, TierPools};
use crate::processor::{BurstProcessor, ProcessingCore, TelemetryPath};
use crate::rtc::RtcWorker;
use crate::swq;
use crate::tier::{QueueLayout, Tier, MAX_SECONDARY_TIERS};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tierbench_common::{
    affinity, BufferPool, CoreCountersSnapshot, CycleClock, HwStamp, LoopbackPort, NicPort,
    Shutdown, StatsRegistry, BURST_SIZE,
};

/// Pool id of the telemetry transmit pool, past every tier
const TELEMETRY_POOL_ID: u8 = MAX_SECONDARY_TIERS as u8 + 1;

type LaneResult = Option<Box<dyn PacketProcessor>>;

struct LaneHandle {
    thread: Option<JoinHandle<LaneResult>>,
    name: String,
}

/// Receive share of one NIC ring
#[derive(Debug, Clone, Serialize)]
pub struct RingShare {
    pub queue: u16,
    pub tier: String,
    pub packets: u64,
    pub percent: f64,
}

/// End-of-run summary
#[derive(Debug, Clone, Serialize)]
pub struct RxReport {
    pub elapsed_secs: f64,
    pub totals: CoreCountersSnapshot,
    pub rings: Vec<RingShare>,
    /// Telemetry packets sent per lane
    pub telemetry_tx: Vec<u64>,
    pub processor_stats: Vec<String>,
}

impl RxReport {
    pub fn log(&self) {
        tracing::info!(
            elapsed_secs = format_args!("{:.2}", self.elapsed_secs),
            received = self.totals.received,
            processed = self.totals.processed(),
            telemetry_tx = self.totals.transmitted,
            telemetry_failed = self.totals.tx_failed,
            "rx totals"
        );
        for r in &self.rings {
            tracing::info!(
                queue = r.queue,
                tier = %r.tier,
                packets = r.packets,
                share = format_args!("{:.2}%", r.percent),
                "rx ring"
            );
        }
        for (lane, n) in self.telemetry_tx.iter().enumerate() {
            tracing::info!(lane, telemetry_tx = n, "rx lane");
        }
        for (lane, s) in self.processor_stats.iter().enumerate() {
            if !s.is_empty() {
                tracing::info!(lane, stats = %s, "processor");
            }
        }
    }
}

/// Tiered receive engine
pub struct RxEngine {
    config: RxConfig,
    layout: QueueLayout,
    clock: CycleClock,
    shutdown: Shutdown,
    pools: Arc<TierPools>,
    tx_pool: Arc<BufferPool>,
    stats: Arc<StatsRegistry>,
    processors: Vec<Box<dyn PacketProcessor>>,
    lanes: Vec<LaneHandle>,
    port: Option<Arc<dyn NicPort>>,
    started: Option<Instant>,
}

impl RxEngine {
    /// Validate the configuration and bring up every tier pool
    pub fn new(config: RxConfig, clock: CycleClock, shutdown: Shutdown) -> RxResult<Self> {
        config.validate()?;
        config.log_banner();

        let found = affinity::numa_node_count();
        let needed = config.tier_mode.required_numa_nodes();
        let numa_nodes = if found >= needed {
            found
        } else if config.strict_numa {
            return Err(RxError::NumaLayout {
                mode: config.tier_mode.to_string(),
                needed,
                found,
            });
        } else {
            tracing::warn!(needed, found, "not enough NUMA nodes, secondary tiers share memory");
            needed
        };

        let layout = QueueLayout::new(config.rx_cores, config.tier_mode);
        let pools = Arc::new(init_tier_pools(&config, numa_nodes)?);
        let tx_pool = Arc::new(BufferPool::new(
            "rx-telemetry",
            TELEMETRY_POOL_ID,
            config.telemetry_pool_size(),
            config.buffer_size,
        )?);
        let stats = Arc::new(StatsRegistry::new(
            config.rx_cores as usize,
            layout.total_queues() as usize,
        ));
        let processors = build_processors(&config.processor, config.rx_cores as usize, clock)?;

        Ok(Self {
            config,
            layout,
            clock,
            shutdown,
            pools,
            tx_pool,
            stats,
            processors,
            lanes: Vec::new(),
            port: None,
            started: None,
        })
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    pub fn layout(&self) -> QueueLayout {
        self.layout
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn pools(&self) -> &Arc<TierPools> {
        &self.pools
    }

    /// Loopback port with every receive queue bound to its tier pool and the
    /// tier steering installed
    pub fn loopback_port(&self, stamp: HwStamp) -> RxResult<LoopbackPort> {
        let mut port = LoopbackPort::new("rx", self.layout.total_queues(), self.config.rx_cores)
            .with_socket(0)
            .with_hw_stamp(stamp);
        for queue in 0..self.layout.total_queues() {
            let tier = self.layout.tier_of(queue).unwrap_or(Tier::Primary);
            let pool = self.pools.get(tier).ok_or_else(|| RxError::TierInit {
                tier: tier.index(),
                reason: "no pool".into(),
            })?;
            let ring = if tier.is_primary() {
                self.config.primary_ring_size
            } else {
                self.config.secondary_ring_size
            };
            port.setup_rx_queue(queue, ring, pool.clone())
                .map_err(|e| RxError::TierInit {
                    tier: tier.index(),
                    reason: e.to_string(),
                })?;
        }
        port.set_steering(self.layout.steering())?;
        port.start()?;
        Ok(port)
    }

    fn lane_cores(&self, lane: u16) -> Vec<usize> {
        let base = self.config.first_core;
        let lane = lane as usize;
        match self.config.op_mode {
            OpMode::Pipeline => vec![base + 2 * lane, base + 2 * lane + 1],
            OpMode::Rtc => vec![base + lane],
        }
    }

    fn check_numa_placement(&self, port: &dyn NicPort) {
        let Some(socket) = port.socket_id() else {
            return;
        };
        for lane in 0..self.config.rx_cores {
            for core in self.lane_cores(lane) {
                if let Some(node) = affinity::numa_node_of_cpu(core) {
                    if node != socket {
                        tracing::warn!(
                            lane,
                            core,
                            core_node = node,
                            port_node = socket,
                            "port is on a remote NUMA node, performance will not be optimal"
                        );
                    }
                }
            }
        }
    }

    /// Spawn every lane thread against `port`
    pub fn start(&mut self, port: Arc<dyn NicPort>) -> RxResult<()> {
        if self.started.is_some() || self.processors.len() < self.config.rx_cores as usize {
            return Err(RxError::AlreadyRunning);
        }
        self.check_numa_placement(port.as_ref());

        self.port = Some(port.clone());
        let processors: Vec<_> = self.processors.drain(..).collect();
        for (lane, processor) in (0..self.config.rx_cores).zip(processors) {
            if let Err(e) = self.spawn_lane(lane, processor, port.clone()) {
                self.shutdown.trigger();
                return Err(e);
            }
        }
        self.started = Some(Instant::now());

        tracing::info!(
            op_mode = %self.config.op_mode,
            lanes = self.config.rx_cores,
            threads = self.lanes.len(),
            "rx engine started"
        );
        Ok(())
    }

    fn spawn_lane(
        &mut self,
        lane: u16,
        processor: Box<dyn PacketProcessor>,
        port: Arc<dyn NicPort>,
    ) -> RxResult<()> {
        let poller = TieredPoller::new(lane, &self.layout, port.clone(), self.stats.clone());
        let inner = BurstProcessor::new(
            lane,
            processor,
            self.pools.clone(),
            TelemetryPath {
                port,
                tx_queue: lane,
                tx_pool: self.tx_pool.clone(),
                primary_queue: poller.primary_queue(),
                secondary_queues: poller.secondary_queues().iter().map(|(_, q)| *q).collect(),
                sample_freq: self.config.sample_freq,
            },
            self.stats.clone(),
            self.clock,
        );
        let cores = self.lane_cores(lane);
        let shutdown = self.shutdown.clone();

        match self.config.op_mode {
            OpMode::Pipeline => {
                let (producer, consumer) = swq::channel(self.config.swq_size);
                let pools = self.pools.clone();
                let clock = self.clock;
                let poll_shutdown = shutdown.clone();
                let poll_core = cores[0];
                self.spawn(format!("rx-poll-{lane}"), move || {
                    affinity::pin_or_warn(poll_core, "rx-poll");
                    poller.run(producer, pools, clock, poll_shutdown);
                    None
                })?;

                let core = ProcessingCore::new(lane, consumer, inner);
                let proc_core = cores[1];
                self.spawn(format!("rx-proc-{lane}"), move || {
                    affinity::pin_or_warn(proc_core, "rx-proc");
                    Some(core.run(shutdown))
                })
            }
            OpMode::Rtc => {
                let worker = RtcWorker::new(poller, inner, self.clock);
                let core = cores[0];
                self.spawn(format!("rx-rtc-{lane}"), move || {
                    affinity::pin_or_warn(core, "rx-rtc");
                    Some(worker.run(shutdown))
                })
            }
        }
    }

    fn spawn<F>(&mut self, name: String, f: F) -> RxResult<()>
    where
        F: FnOnce() -> LaneResult + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|e| RxError::SpawnFailed(format!("{name}: {e}")))?;
        self.lanes.push(LaneHandle {
            thread: Some(handle),
            name,
        });
        Ok(())
    }

    /// Monitor over this engine's counters, for a thread of the caller's
    pub fn monitor(&self) -> RxMonitor {
        RxMonitor::new(self.stats.clone(), self.layout, self.clock)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.config.monitor_interval_ms)
    }

    /// Report on the calling thread until shutdown
    pub fn run_monitor(&self) {
        self.monitor().run(self.monitor_interval(), &self.shutdown);
    }

    /// Stop every lane, join it and build the final report
    pub fn stop(&mut self) -> RxReport {
        self.shutdown.trigger();

        let mut processor_stats = Vec::new();
        for lane in &mut self.lanes {
            let Some(handle) = lane.thread.take() else {
                continue;
            };
            match handle.join() {
                Ok(Some(p)) => processor_stats.push(p.stats()),
                Ok(None) => {}
                Err(_) => tracing::error!(thread = %lane.name, "lane thread panicked"),
            }
        }
        self.lanes.clear();
        self.drain_port();

        let report = self.report(processor_stats);
        tracing::info!("rx engine stopped");
        report
    }

    /// Port teardown: hand whatever still sits in a receive ring back to
    /// its tier pool
    fn drain_port(&mut self) {
        let Some(port) = self.port.take() else {
            return;
        };
        let mut burst = Vec::with_capacity(BURST_SIZE);
        let mut drained = 0;
        for queue in 0..self.layout.total_queues() {
            loop {
                let n = port.rx_burst(queue, &mut burst, BURST_SIZE);
                if n == 0 {
                    break;
                }
                drained += n;
                self.pools.release_all(burst.drain(..));
            }
        }
        if drained != 0 {
            tracing::debug!(drained, "released buffers left in receive rings");
        }
    }

    fn report(&self, processor_stats: Vec<String>) -> RxReport {
        let snap = self.stats.snapshot();
        let shares = snap.ring_shares();
        let rings = snap
            .rings
            .iter()
            .zip(shares)
            .enumerate()
            .map(|(queue, (packets, percent))| RingShare {
                queue: queue as u16,
                tier: self
                    .layout
                    .tier_of(queue as u16)
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
                packets: *packets,
                percent,
            })
            .collect();
        RxReport {
            elapsed_secs: self
                .started
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or_default(),
            totals: snap.total(),
            rings,
            telemetry_tx: snap.cores.iter().map(|c| c.transmitted).collect(),
            processor_stats,
        }
    }
}

impl Drop for RxEngine {
    fn drop(&mut self) {
        if self.lanes.iter().any(|l| l.thread.is_some()) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{ProcessorConfig, ProcessorKind};
    use crate::tier::TierMode;
    use tierbench_common::telemetry::field;

    fn config(op_mode: OpMode, tier_mode: TierMode) -> RxConfig {
        RxConfig {
            op_mode,
            tier_mode,
            rx_cores: 2,
            first_core: 0,
            primary_ring_size: 256,
            secondary_ring_size: 128,
            primary_pool_size: 512,
            secondary_pool_size: 256,
            buffer_size: 256,
            swq_size: 1024,
            sample_freq: Some(8),
            monitor_interval_ms: 10,
            processor: ProcessorConfig {
                kind: ProcessorKind::HeaderTouch,
                arg: 0,
            },
            strict_numa: false,
        }
    }

    fn frame(src: u16, dst: u16) -> Vec<u8> {
        let mut f = vec![0u8; 128];
        f[12] = 0x08;
        f[14] = 0x45;
        f[23] = 17;
        f[34..36].copy_from_slice(&src.to_be_bytes());
        f[36..38].copy_from_slice(&dst.to_be_bytes());
        field::stamp(&mut f, 42);
        f
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn run_mode(op_mode: OpMode) {
        let shutdown = Shutdown::new();
        let mut engine = RxEngine::new(
            config(op_mode, TierMode::Cxl),
            CycleClock::with_hz(1_000_000_000),
            shutdown,
        )
        .unwrap();
        let rx = Arc::new(engine.loopback_port(HwStamp::Rx).unwrap());
        let mut echo = LoopbackPort::new("echo", 1, 1);
        echo.setup_rx_queue(0, 1024, Arc::new(BufferPool::new("echo", 0, 1024, 256).unwrap()))
            .unwrap();
        let echo = Arc::new(echo);
        LoopbackPort::connect(&rx, &echo);

        engine.start(rx.clone()).unwrap();
        assert!(matches!(engine.start(rx.clone()), Err(RxError::AlreadyRunning)));

        for i in 0..100u16 {
            assert!(rx.deliver(&frame(i, 100), HwStamp::None));
            assert!(rx.deliver(&frame(i, 102), HwStamp::None));
        }
        let stats = engine.stats().clone();
        wait_for(|| stats.snapshot().total().processed() == 200);

        let report = engine.stop();
        assert_eq!(report.totals.received, 200);
        assert_eq!(report.totals.processed(), 200);
        assert_eq!(report.totals.primary_processed, 100);
        assert_eq!(report.totals.secondary_processed, 100);
        let primary: u64 = report
            .rings
            .iter()
            .filter(|r| r.tier == "primary")
            .map(|r| r.packets)
            .sum();
        assert_eq!(primary, 100);
        assert!(report.totals.transmitted > 0);
        assert_eq!(echo.rx_queue_count(0) as u64, report.totals.transmitted);
        assert_eq!(report.processor_stats.len(), 2);
        for p in engine.pools().iter() {
            assert_eq!(p.allocated(), 0);
        }
    }

    #[test]
    fn test_stop_releases_unpolled_frames() {
        let mut engine = RxEngine::new(
            config(OpMode::Pipeline, TierMode::Cxl),
            CycleClock::with_hz(1_000_000_000),
            Shutdown::new(),
        )
        .unwrap();
        let rx = Arc::new(engine.loopback_port(HwStamp::None).unwrap());
        engine.start(rx.clone()).unwrap();
        engine.stop();

        // lanes are gone, frames stay in the rings until teardown
        for i in 0..20u16 {
            assert!(rx.deliver(&frame(i, 100), HwStamp::None));
            assert!(rx.deliver(&frame(i, 102), HwStamp::None));
        }
        let held: usize = engine.pools().iter().map(|p| p.allocated()).sum();
        assert_eq!(held, 40);

        engine.port = Some(rx);
        engine.drain_port();
        for p in engine.pools().iter() {
            assert_eq!(p.allocated(), 0);
        }
    }

    #[test]
    fn test_pipeline_end_to_end() {
        run_mode(OpMode::Pipeline);
    }

    #[test]
    fn test_rtc_end_to_end() {
        run_mode(OpMode::Rtc);
    }

    #[test]
    fn test_strict_numa_rejects_missing_nodes() {
        let cfg = RxConfig {
            strict_numa: true,
            ..config(OpMode::Pipeline, TierMode::Numa)
        };
        if affinity::numa_node_count() < 4 {
            assert!(matches!(
                RxEngine::new(cfg, CycleClock::with_hz(1_000_000_000), Shutdown::new()),
                Err(RxError::NumaLayout { needed: 4, .. })
            ));
        }
    }

    #[test]
    fn test_loopback_port_layout() {
        let engine = RxEngine::new(
            config(OpMode::Rtc, TierMode::Numa),
            CycleClock::with_hz(1_000_000_000),
            Shutdown::new(),
        )
        .unwrap();
        let port = engine.loopback_port(HwStamp::None).unwrap();
        assert_eq!(engine.layout().total_queues(), 8);
        // dst 102 lands in a secondary queue (2..8)
        assert!(port.deliver(&frame(7, 102), HwStamp::None));
        let secondary: usize = (2..8).map(|q| port.rx_queue_count(q)).sum();
        assert_eq!(secondary, 1);
    }
}
