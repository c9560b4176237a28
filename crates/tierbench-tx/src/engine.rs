//! TX Engine
//!
//! Resolves the schedule into per-core packet targets, spawns the pinned
//! generator and correlator threads and writes the output files once they
//! are joined.
//!
//! Core assignment, with `c = first_core` and `t = tx_cores`:
//!
//! | Thread | Core | Queue |
//! |--------|------|-------|
//! | generator i | c + i | tx queue i |
//! | correlator j | c + t + j | rx queue j |
//!
//! Counters: generators occupy registry slots `0..t`, correlators `t..t+r`.

use crate::config::TxConfig;
use crate::correlator::{Correlator, CorrelatorOutput};
use crate::error::{TxError, TxResult};
use crate::generator::{TrafficOptions, TxGenerator};
use crate::monitor::TxMonitor;
use crate::occupancy::OccupancyLog;
use crate::rate::RateModel;
use crate::register::RateRegister;
use crate::report::{self, LatencySummary, TxReport};
use crate::schedule::BurstSchedule;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tierbench_common::telemetry::HEADER_END;
use tierbench_common::{
    affinity, BufferPool, CycleClock, HwStamp, LoopbackPort, NicPort, Shutdown, Steering,
    StatsRegistry,
};

struct WorkerHandle<T> {
    thread: Option<JoinHandle<T>>,
    name: String,
}

impl<T> WorkerHandle<T> {
    fn join(&mut self) -> Option<T> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::error!(thread = %self.name, "worker thread panicked");
                None
            }
        }
    }
}

fn spawn<T, F>(name: String, f: F) -> TxResult<WorkerHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| TxError::SpawnFailed(format!("{name}: {e}")))?;
    Ok(WorkerHandle {
        thread: Some(handle),
        name,
    })
}

/// Burst-rate transmit engine
pub struct TxEngine {
    config: TxConfig,
    schedule: BurstSchedule,
    model: RateModel,
    targets: Vec<u64>,
    clock: CycleClock,
    shutdown: Shutdown,
    stats: Arc<StatsRegistry>,
    register: Option<Arc<Mutex<RateRegister>>>,
    rx_pools: Vec<Arc<BufferPool>>,
    generators: Vec<WorkerHandle<u64>>,
    correlators: Vec<WorkerHandle<CorrelatorOutput>>,
    started: Option<Instant>,
}

impl TxEngine {
    /// Validate the configuration, load the schedule and map the register
    pub fn new(config: TxConfig, clock: CycleClock, shutdown: Shutdown) -> TxResult<Self> {
        config.validate()?;
        config.log_banner();

        let schedule = config.resolve_schedule()?;
        let model = RateModel::for_link(config.link_gbps, config.packet_size, config.tx_cores);
        let targets = model.targets(&schedule);
        tracing::info!(
            max_mpps = format_args!("{:.3}", model.max_pps() / 1e6),
            per_core_mpps = format_args!("{:.3}", model.per_core_pps() / 1e6),
            wire_bytes = model.wire_bytes(),
            "link rate"
        );
        for (i, (e, t)) in schedule.entries().iter().zip(&targets).enumerate() {
            tracing::info!(
                entry = i,
                duration_us = e.duration_us,
                gap_us = e.gap_us,
                packets_per_core = t,
                "burst"
            );
        }

        let register = match &config.rate_register {
            Some(cfg) => Some(Arc::new(Mutex::new(RateRegister::open(cfg)?))),
            None => None,
        };

        let buffer_size = config.packet_size.max(HEADER_END);
        let rx_pools = (0..config.rx_cores)
            .map(|q| {
                BufferPool::for_ring(
                    format!("tx-corr-{q}"),
                    0,
                    config.rx_pool_size,
                    buffer_size,
                    config.rx_ring_size,
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stats = Arc::new(StatsRegistry::new(
            (config.tx_cores + config.rx_cores) as usize,
            config.rx_cores as usize,
        ));

        Ok(Self {
            config,
            schedule,
            model,
            targets,
            clock,
            shutdown,
            stats,
            register,
            rx_pools,
            generators: Vec::new(),
            correlators: Vec::new(),
            started: None,
        })
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    pub fn schedule(&self) -> &BurstSchedule {
        &self.schedule
    }

    /// Per-core packet target of every schedule entry
    pub fn targets(&self) -> &[u64] {
        &self.targets
    }

    pub fn model(&self) -> RateModel {
        self.model
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Loopback port with one receive queue per correlator, spread flat
    pub fn loopback_port(&self, stamp: HwStamp) -> TxResult<LoopbackPort> {
        let mut port = LoopbackPort::new("tx", self.config.rx_cores, self.config.tx_cores)
            .with_socket(0)
            .with_hw_stamp(stamp);
        for (queue, pool) in self.rx_pools.iter().enumerate() {
            port.setup_rx_queue(queue as u16, self.config.rx_ring_size, pool.clone())?;
        }
        port.set_steering(Steering::flat(self.config.rx_cores))?;
        port.start()?;
        Ok(port)
    }

    /// Spawn generators and correlators against `port`
    pub fn start(&mut self, port: Arc<dyn NicPort>) -> TxResult<()> {
        if self.started.is_some() {
            return Err(TxError::AlreadyRunning);
        }
        if let Err(e) = self.spawn_all(port) {
            self.shutdown.trigger();
            return Err(e);
        }
        self.started = Some(Instant::now());
        tracing::info!(
            generators = self.generators.len(),
            correlators = self.correlators.len(),
            "tx engine started"
        );
        Ok(())
    }

    fn spawn_all(&mut self, port: Arc<dyn NicPort>) -> TxResult<()> {
        let first = self.config.first_core;
        let tx_cores = self.config.tx_cores;

        // correlators first so no echoed telemetry is missed
        for lane in 0..self.config.rx_cores {
            let pool = self.rx_pools[lane as usize].clone();
            let corr = Correlator::new(
                lane,
                (tx_cores + lane) as usize,
                port.clone(),
                lane,
                pool,
                self.clock,
                self.config.software_timestamp,
                self.config.sample_cap,
                self.register.clone(),
                self.stats.clone(),
            );
            let core = first + (tx_cores + lane) as usize;
            let shutdown = self.shutdown.clone();
            let handle = spawn(format!("tx-corr-{lane}"), move || {
                affinity::pin_or_warn(core, "tx-corr");
                corr.run(shutdown)
            })?;
            self.correlators.push(handle);
        }

        let opts = TrafficOptions {
            spec: self.config.packet_spec(),
            dst_port: self.config.dst_port,
            secondary_dst_port: self.config.secondary_dst_port,
            random_src_ip: self.config.random_src_ip,
            software_timestamp: self.config.software_timestamp,
        };
        for lane in 0..tx_cores {
            let generator = TxGenerator::new(
                lane,
                port.clone(),
                lane,
                self.schedule.clone(),
                self.targets.clone(),
                opts,
                self.clock,
                self.stats.clone(),
            )?;
            let core = first + lane as usize;
            let shutdown = self.shutdown.clone();
            let handle = spawn(format!("tx-gen-{lane}"), move || {
                affinity::pin_or_warn(core, "tx-gen");
                generator.run(shutdown)
            })?;
            self.generators.push(handle);
        }
        Ok(())
    }

    /// Report on the calling thread until shutdown
    pub fn run_monitor(&self) {
        let monitor = TxMonitor::new(
            self.stats.clone(),
            self.model,
            self.config.tx_cores as usize,
        );
        monitor.run(
            Duration::from_millis(self.config.monitor_interval_ms),
            &self.shutdown,
        );
    }

    /// Stop every worker, write the output files and build the report
    pub fn stop(&mut self) -> TxResult<TxReport> {
        self.shutdown.trigger();

        let bursts: Vec<u64> = self
            .generators
            .iter_mut()
            .map(|g| g.join().unwrap_or(0))
            .collect();
        let outputs: Vec<CorrelatorOutput> = self
            .correlators
            .iter_mut()
            .filter_map(WorkerHandle::join)
            .collect();
        self.generators.clear();
        self.correlators.clear();

        let mut occupancy = OccupancyLog::new(self.config.sample_cap);
        for o in &outputs {
            occupancy.merge(o.occupancy.clone());
        }

        if let Some(path) = &self.config.latency_outfile {
            report::write_latencies(path, &outputs)?;
        }
        if let Some(path) = &self.config.occupancy_outfile {
            report::write_occupancy(path, &occupancy)?;
        }

        let snap = self.stats.snapshot();
        let tx_cores = self.config.tx_cores as usize;
        let report = TxReport {
            elapsed_secs: self
                .started
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or_default(),
            sent: snap.cores[..tx_cores].iter().map(|c| c.transmitted).collect(),
            bursts,
            telemetry_rx: snap.cores[tx_cores..].iter().map(|c| c.received).sum(),
            invalid_latencies: outputs.iter().map(|o| o.invalid).sum(),
            latency: LatencySummary::from_samples(outputs.iter().flat_map(|o| &o.latencies)),
            occupancy_samples: occupancy.len(),
            register_errors: outputs.iter().map(|o| o.register_errors).sum(),
        };
        tracing::info!("tx engine stopped");
        Ok(report)
    }
}

impl Drop for TxEngine {
    fn drop(&mut self) {
        let running = self.generators.iter().any(|g| g.thread.is_some())
            || self.correlators.iter().any(|c| c.thread.is_some());
        if running {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "tx engine stop on drop failed");
            }
        }
    }
}
