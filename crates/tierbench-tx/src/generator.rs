//! Burst-Rate Generator
//!
//! One generator per transmit core. It owns a burst of template frames and
//! cycles through the schedule:
//!
//! ```text
//!  ┌─ stamp (sw timestamps) ─► send target in 32-packet chunks ─┐
//!  │                                                            │
//!  └── next entry ◄── spin gap ◄── refresh src ◄── spin rest ───┘
//! ```
//!
//! Chunks go out back to back; the only waits inside a burst are retries
//! when the NIC refuses a chunk. All waits are cycle-counter spins.

use crate::error::TxResult;
use crate::packet::{self, PacketSpec};
use crate::schedule::BurstSchedule;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tierbench_common::{BufferPool, CycleClock, NicPort, PacketBuffer, Shutdown, StatsRegistry, BURST_SIZE};

/// Frame options for one generator
#[derive(Debug, Clone, Copy)]
pub struct TrafficOptions {
    pub spec: PacketSpec,
    pub dst_port: u16,
    pub secondary_dst_port: Option<u16>,
    pub random_src_ip: bool,
    pub software_timestamp: bool,
}

/// Result of one schedule step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstOutcome {
    pub entry: usize,
    pub target: u64,
    pub sent: u64,
    /// Cycles spent sending, before padding to the burst duration
    pub send_cycles: u64,
}

/// Paced transmitter of one core
pub struct TxGenerator {
    lane: u16,
    port: Arc<dyn NicPort>,
    queue: u16,
    pool: Arc<BufferPool>,
    templates: Vec<PacketBuffer>,
    schedule: BurstSchedule,
    targets: Vec<u64>,
    opts: TrafficOptions,
    clock: CycleClock,
    stats: Arc<StatsRegistry>,
    rng: StdRng,
    entry: usize,
    bursts: u64,
}

impl TxGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lane: u16,
        port: Arc<dyn NicPort>,
        queue: u16,
        schedule: BurstSchedule,
        targets: Vec<u64>,
        opts: TrafficOptions,
        clock: CycleClock,
        stats: Arc<StatsRegistry>,
    ) -> TxResult<Self> {
        let pool = Arc::new(BufferPool::new(
            format!("tx-{lane}"),
            0,
            BURST_SIZE,
            opts.spec.size,
        )?);
        let mut rng = StdRng::seed_from_u64(clock.now().wrapping_add(lane as u64 * 1024));

        let mut templates = Vec::with_capacity(BURST_SIZE);
        pool.alloc_bulk(&mut templates, BURST_SIZE)?;
        for (i, buf) in templates.iter_mut().enumerate() {
            let dst_port = match opts.secondary_dst_port {
                Some(p) if i % 2 == 1 => p,
                _ => opts.dst_port,
            };
            let src_port: u16 = rng.gen();
            if let Some(frame) = buf.append(opts.spec.size) {
                packet::build_udp_frame(frame, &opts.spec, i as u16 + 1, src_port, dst_port, &mut rng);
            }
        }

        Ok(Self {
            lane,
            port,
            queue,
            pool,
            templates,
            schedule,
            targets,
            opts,
            clock,
            stats,
            rng,
            entry: 0,
            bursts: 0,
        })
    }

    pub fn lane(&self) -> u16 {
        self.lane
    }

    pub fn templates(&self) -> &[PacketBuffer] {
        &self.templates
    }

    /// Send one schedule entry and wait out its duration and gap
    pub fn step(&mut self, shutdown: &Shutdown) -> BurstOutcome {
        let idx = self.entry;
        let entry = self.schedule.get(idx);
        let target = self.targets.get(idx).copied().unwrap_or(0);

        if self.opts.software_timestamp {
            let now = self.clock.now();
            for t in &mut self.templates {
                packet::stamp_send(t.data_mut(), now);
            }
        }

        let start = self.clock.now();
        let mut sent = 0u64;
        while sent < target && shutdown.is_running() {
            let n = (target - sent).min(BURST_SIZE as u64) as usize;
            let accepted = self.port.tx_burst(self.queue, &self.templates[..n]);
            if accepted == 0 {
                std::hint::spin_loop();
            }
            sent += accepted as u64;
        }
        let send_cycles = self.clock.now().wrapping_sub(start);

        let budget = self.clock.ns_to_cycles(entry.duration_us as u64 * 1000);
        if send_cycles < budget {
            self.clock.spin_cycles(budget - send_cycles);
        }

        for t in &mut self.templates {
            packet::refresh_source(t.data_mut(), &mut self.rng, self.opts.random_src_ip);
        }

        self.stats.core(self.lane as usize).record_tx(sent);
        self.clock.spin_us(entry.gap_us as u64);

        self.entry = self.schedule.next_index(idx);
        self.bursts += 1;
        BurstOutcome {
            entry: idx,
            target,
            sent,
            send_cycles,
        }
    }

    /// Generate until shutdown; returns the bursts sent
    pub fn run(mut self, shutdown: Shutdown) -> u64 {
        tracing::debug!(lane = self.lane, queue = self.queue, "generator started");
        while shutdown.is_running() {
            self.step(&shutdown);
        }
        tracing::debug!(lane = self.lane, bursts = self.bursts, "generator stopped");
        self.pool.free_bulk(self.templates.drain(..));
        self.bursts
    }
}
