//! Tiered RX Poller
//!
//! One poller per lane. In the primary state it polls the lane's primary
//! queue; in the secondary state it polls every secondary queue of the lane
//! and merges the results into one burst. An empty poll flips the state
//! (see [`TierState::next`]).
//!
//! In pipeline mode the burst goes into the lane's software queue with a
//! busy-retry enqueue, so a bound buffer is never dropped while the process
//! is running.

use crate::pools::TierPools;
use crate::swq::Producer;
use crate::tier::{QueueLayout, Tier, TierState};
use std::sync::Arc;
use tierbench_common::{CycleClock, NicPort, PacketBuffer, Shutdown, StatsRegistry, BURST_SIZE};

/// Polls the tiers of one lane
pub struct TieredPoller {
    lane: u16,
    port: Arc<dyn NicPort>,
    primary_queue: u16,
    secondary_queues: Vec<(Tier, u16)>,
    state: TierState,
    stats: Arc<StatsRegistry>,
    burst: Vec<PacketBuffer>,
}

impl TieredPoller {
    pub fn new(
        lane: u16,
        layout: &QueueLayout,
        port: Arc<dyn NicPort>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        let secondary_queues = layout.secondary_queues(lane);
        Self {
            lane,
            port,
            primary_queue: layout.primary_queue(lane),
            burst: Vec::with_capacity(BURST_SIZE * (1 + secondary_queues.len())),
            secondary_queues,
            state: TierState::Primary,
            stats,
        }
    }

    pub fn lane(&self) -> u16 {
        self.lane
    }

    pub fn state(&self) -> TierState {
        self.state
    }

    pub fn primary_queue(&self) -> u16 {
        self.primary_queue
    }

    pub fn secondary_queues(&self) -> &[(Tier, u16)] {
        &self.secondary_queues
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Buffers received by the last poll
    pub fn burst_mut(&mut self) -> &mut Vec<PacketBuffer> {
        &mut self.burst
    }

    /// Poll the queues of the current state into the burst, count what
    /// arrived, and advance the tier state. Returns the packets received.
    #[inline]
    pub fn poll_tiers(&mut self) -> usize {
        let start = self.burst.len();
        let received = match self.state {
            TierState::Primary => {
                let n = self.port.rx_burst(self.primary_queue, &mut self.burst, BURST_SIZE);
                self.stats.record_ring(self.primary_queue, n as u64);
                n
            }
            TierState::Secondary => {
                let mut total = 0;
                for (_, queue) in &self.secondary_queues {
                    let n = self.port.rx_burst(*queue, &mut self.burst, BURST_SIZE);
                    self.stats.record_ring(*queue, n as u64);
                    total += n;
                }
                total
            }
        };

        if received != 0 {
            let bytes: usize = self.burst[start..].iter().map(PacketBuffer::len).sum();
            self.stats
                .core(self.lane as usize)
                .record_rx(received as u64, bytes as u64);
        }
        self.state = self.state.next(received, !self.secondary_queues.is_empty());
        received
    }

    /// Pipeline poller loop
    pub fn run(
        mut self,
        mut queue: Producer<PacketBuffer>,
        pools: Arc<TierPools>,
        clock: CycleClock,
        shutdown: Shutdown,
    ) {
        tracing::debug!(lane = self.lane, "poller started");
        let counters_idx = self.lane as usize;

        while shutdown.is_running() {
            let started = clock.now();
            if self.poll_tiers() == 0 {
                continue;
            }
            queue.push_burst_blocking(&mut self.burst, &shutdown);
            self.stats
                .core(counters_idx)
                .record_polling(clock.now().wrapping_sub(started));
        }

        // Stopped mid-enqueue: release what never made it into the queue
        pools.release_all(self.burst.drain(..));
        tracing::debug!(lane = self.lane, "poller stopped");
    }
}
