//! Processing Core
//!
//! Drains a lane's software queue in bursts, runs the packet processor once
//! per packet, and every `sample_freq` processed packets reflects one
//! telemetry packet back out of the port. The telemetry packet takes its
//! L2-L4 headers, send timestamp and hardware timestamps from the first
//! packet of the current burst, then gets stamped with:
//!
//! - slot 0: software queue depth + primary NIC ring depth of the lane
//! - slots 1..: NIC ring depth of each secondary queue of the lane
//! - packets processed per tier group since the previous emission
//! - the lane's rolling consumption rate
//!
//! Every buffer of a burst goes back to its tier pool once the burst is done.

use crate::apps::PacketProcessor;
use crate::pools::TierPools;
use crate::swq::Consumer;
use crate::tier::Tier;
use std::sync::Arc;
use tierbench_common::telemetry::{self, TelemetryHeader, HEADER_END, L2L4_LEN, SAMPLE_SLOTS};
use tierbench_common::{
    BufferPool, CycleClock, NicPort, PacketBuffer, Shutdown, StatsRegistry, BURST_SIZE,
};

/// Packet size the consumption rate is expressed for
const RATE_PACKET_BYTES: f64 = 1024.0;
/// Weight of the newest measurement
const RATE_ALPHA: f64 = 0.125;

/// Exponentially weighted consumption-rate estimate in bytes per microsecond
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollingRate {
    bytes_per_us: u64,
}

impl RollingRate {
    /// Current estimate
    pub fn get(&self) -> u64 {
        self.bytes_per_us
    }

    /// Fold in a measured per-packet processing time
    pub fn update(&mut self, ns_per_packet: f64) -> u64 {
        if ns_per_packet > 0.0 && ns_per_packet.is_finite() {
            let current = RATE_PACKET_BYTES * (1000.0 / ns_per_packet);
            self.bytes_per_us =
                (RATE_ALPHA * current + (1.0 - RATE_ALPHA) * self.bytes_per_us as f64) as u64;
        }
        self.bytes_per_us
    }
}

/// Where a lane reflects telemetry and which rings it samples
pub struct TelemetryPath {
    pub port: Arc<dyn NicPort>,
    pub tx_queue: u16,
    pub tx_pool: Arc<BufferPool>,
    pub primary_queue: u16,
    pub secondary_queues: Vec<u16>,
    /// Processed packets between emissions; `None` disables telemetry
    pub sample_freq: Option<u64>,
}

/// Per-burst processing shared by pipeline and run-to-completion lanes
pub struct BurstProcessor {
    lane: u16,
    processor: Box<dyn PacketProcessor>,
    pools: Arc<TierPools>,
    telemetry: TelemetryPath,
    stats: Arc<StatsRegistry>,
    clock: CycleClock,
    rate: RollingRate,
    since_emit: u64,
    primary_since: u64,
    secondary_since: u64,
    cycles_since: u64,
}

impl BurstProcessor {
    pub fn new(
        lane: u16,
        processor: Box<dyn PacketProcessor>,
        pools: Arc<TierPools>,
        telemetry: TelemetryPath,
        stats: Arc<StatsRegistry>,
        clock: CycleClock,
    ) -> Self {
        Self {
            lane,
            processor,
            pools,
            telemetry,
            stats,
            clock,
            rate: RollingRate::default(),
            since_emit: 0,
            primary_since: 0,
            secondary_since: 0,
            cycles_since: 0,
        }
    }

    pub fn rate(&self) -> RollingRate {
        self.rate
    }

    /// Hand the processor back (end-of-run stats)
    pub fn into_processor(self) -> Box<dyn PacketProcessor> {
        self.processor
    }

    /// Process and release every buffer of `burst`. `queued` is the depth of
    /// the software queue feeding this lane (0 in run-to-completion).
    pub fn handle(&mut self, burst: &mut Vec<PacketBuffer>, queued: usize) {
        if burst.is_empty() {
            return;
        }
        let started = self.clock.now();

        let mut primary = 0u64;
        for buf in burst.iter_mut() {
            self.processor.process(buf.data_mut());
            if buf.pool_id() == Tier::Primary.index() {
                primary += 1;
            }
        }
        self.processor.end_burst();

        let n = burst.len() as u64;
        let secondary = n - primary;
        self.since_emit += n;
        self.primary_since += primary;
        self.secondary_since += secondary;

        if let Some(freq) = self.telemetry.sample_freq {
            if self.since_emit > freq {
                let window = self.cycles_since + self.clock.now().wrapping_sub(started);
                let ns_per_packet = self.clock.cycles_to_ns(window) as f64 / self.since_emit as f64;
                self.rate.update(ns_per_packet);
                self.emit(&burst[0], queued);
                self.since_emit = 0;
                self.primary_since = 0;
                self.secondary_since = 0;
                self.cycles_since = 0;
            }
        }

        self.pools.release_all(burst.drain(..));

        let cycles = self.clock.now().wrapping_sub(started);
        self.cycles_since += cycles;
        self.stats
            .core(self.lane as usize)
            .record_processing(primary, secondary, cycles);
    }

    /// Build and send one telemetry packet from `source`
    fn emit(&mut self, source: &PacketBuffer, queued: usize) {
        let counters = self.stats.core(self.lane as usize);
        let Some(mut pkt) = self.telemetry.tx_pool.alloc() else {
            counters.record_tx_failure();
            tracing::warn!(lane = self.lane, "telemetry pool exhausted");
            return;
        };

        let src = source.data();
        let mut hdr = TelemetryHeader::decode(src).unwrap_or_default();
        let port = &self.telemetry.port;

        hdr.sample_index = [telemetry::UNUSED_SAMPLE; SAMPLE_SLOTS];
        hdr.sample_value = [0; SAMPLE_SLOTS];
        hdr.sample_index[0] = self.telemetry.primary_queue as u8;
        hdr.sample_value[0] = saturate(queued + port.rx_queue_count(self.telemetry.primary_queue));
        for (slot, queue) in self
            .telemetry
            .secondary_queues
            .iter()
            .take(SAMPLE_SLOTS - 1)
            .enumerate()
        {
            hdr.sample_index[slot + 1] = *queue as u8;
            hdr.sample_value[slot + 1] = saturate(port.rx_queue_count(*queue));
        }
        hdr.primary_processed = saturate(self.primary_since as usize);
        hdr.secondary_processed = saturate(self.secondary_since as usize);
        hdr.consumption_rate = self.rate.get();

        if let Some(frame) = pkt.append(HEADER_END) {
            if src.len() >= L2L4_LEN {
                frame[..L2L4_LEN].copy_from_slice(&src[..L2L4_LEN]);
            }
            hdr.encode(frame);
        }

        let sent = port.tx_burst(self.telemetry.tx_queue, std::slice::from_ref(&pkt));
        self.telemetry.tx_pool.free(pkt);
        if sent == 0 {
            counters.record_tx_failure();
            tracing::warn!(lane = self.lane, queue = self.telemetry.tx_queue, "telemetry transmit failed");
        } else {
            counters.record_tx(sent as u64);
        }
    }
}

#[inline(always)]
fn saturate(v: usize) -> u16 {
    v.min(u16::MAX as usize) as u16
}

/// Pipeline consumer: one per lane, fed by the lane's poller
pub struct ProcessingCore {
    lane: u16,
    queue: Consumer<PacketBuffer>,
    inner: BurstProcessor,
    burst: Vec<PacketBuffer>,
}

impl ProcessingCore {
    pub fn new(lane: u16, queue: Consumer<PacketBuffer>, inner: BurstProcessor) -> Self {
        Self {
            lane,
            queue,
            inner,
            burst: Vec::with_capacity(BURST_SIZE),
        }
    }

    /// Dequeue and handle one burst; 0 when the queue was empty
    #[inline]
    pub fn poll_once(&mut self) -> usize {
        let n = self.queue.pop_burst(&mut self.burst, BURST_SIZE);
        if n != 0 {
            let queued = self.queue.len();
            self.inner.handle(&mut self.burst, queued);
        }
        n
    }

    /// Busy-poll until shutdown, then release everything the poller still
    /// manages to enqueue until it drops its end of the queue
    pub fn run(mut self, shutdown: Shutdown) -> Box<dyn PacketProcessor> {
        tracing::debug!(lane = self.lane, "processing core started");
        while shutdown.is_running() {
            self.poll_once();
        }
        while !self.queue.is_closed() {
            match self.queue.pop() {
                Some(buf) => self.inner.pools.release(buf),
                None => std::hint::spin_loop(),
            }
        }
        tracing::debug!(lane = self.lane, "processing core stopped");
        self.inner.into_processor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swq;
    use parking_lot::Mutex;
    use tierbench_common::telemetry::field;

    /// Records transmitted frames, reports fixed ring depths
    struct CapturePort {
        sent: Mutex<Vec<Vec<u8>>>,
        depth: usize,
        accept: bool,
    }

    impl CapturePort {
        fn new(depth: usize, accept: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                depth,
                accept,
            })
        }
    }

    impl NicPort for CapturePort {
        fn rx_burst(&self, _q: u16, _out: &mut Vec<PacketBuffer>, _max: usize) -> usize {
            0
        }
        fn tx_burst(&self, _q: u16, pkts: &[PacketBuffer]) -> usize {
            if !self.accept {
                return 0;
            }
            let mut sent = self.sent.lock();
            for p in pkts {
                sent.push(p.data().to_vec());
            }
            pkts.len()
        }
        fn rx_queue_count(&self, queue: u16) -> usize {
            self.depth + queue as usize
        }
        fn socket_id(&self) -> Option<usize> {
            None
        }
    }

    struct Counting(Arc<Mutex<u64>>);

    impl PacketProcessor for Counting {
        fn process(&mut self, _pkt: &mut [u8]) {
            *self.0.lock() += 1;
        }
    }

    fn pools() -> Arc<TierPools> {
        Arc::new(TierPools::from_pools(vec![
            Arc::new(BufferPool::new("p", 0, 256, 128).unwrap()),
            Arc::new(BufferPool::new("s", 1, 256, 128).unwrap()),
        ]))
    }

    fn lane(
        port: Arc<CapturePort>,
        pools: Arc<TierPools>,
        sample_freq: Option<u64>,
    ) -> (BurstProcessor, Arc<Mutex<u64>>, Arc<StatsRegistry>) {
        let calls = Arc::new(Mutex::new(0));
        let stats = Arc::new(StatsRegistry::new(1, 2));
        let path = TelemetryPath {
            port,
            tx_queue: 0,
            tx_pool: Arc::new(BufferPool::new("tx", 9, 8, 128).unwrap()),
            primary_queue: 0,
            secondary_queues: vec![1],
            sample_freq,
        };
        let bp = BurstProcessor::new(
            0,
            Box::new(Counting(calls.clone())),
            pools,
            path,
            stats.clone(),
            CycleClock::with_hz(1_000_000_000),
        );
        (bp, calls, stats)
    }

    fn burst(pools: &TierPools, primary: usize, secondary: usize, stamp: u64) -> Vec<PacketBuffer> {
        let mut out = Vec::new();
        for (tier, n) in [(Tier::Primary, primary), (Tier::Secondary1, secondary)] {
            for _ in 0..n {
                let mut b = pools.get(tier).unwrap().alloc().unwrap();
                b.append(128);
                b.data_mut()[36..38].copy_from_slice(&100u16.to_be_bytes());
                field::stamp(b.data_mut(), stamp);
                out.push(b);
            }
        }
        out
    }

    #[test]
    fn test_rolling_rate() {
        let mut r = RollingRate::default();
        // 1024 B per 1000 ns = 1024 B/us, first step takes an eighth
        assert_eq!(r.update(1000.0), 128);
        assert_eq!(r.update(1000.0), 240);
        assert_eq!(r.update(0.0), 240);
    }

    #[test]
    fn test_every_packet_processed_and_released() {
        let pools = pools();
        let port = CapturePort::new(0, true);
        let (mut bp, calls, stats) = lane(port.clone(), pools.clone(), None);
        let mut b = burst(&pools, 20, 12, 1);
        bp.handle(&mut b, 0);

        assert!(b.is_empty());
        assert_eq!(*calls.lock(), 32);
        assert!(port.sent.lock().is_empty());
        for p in pools.iter() {
            assert_eq!(p.allocated(), 0);
        }
        let s = stats.snapshot().cores[0];
        assert_eq!((s.primary_processed, s.secondary_processed), (20, 12));
    }

    #[test]
    fn test_telemetry_after_sample_freq() {
        let pools = pools();
        let port = CapturePort::new(3, true);
        let (mut bp, _calls, stats) = lane(port.clone(), pools.clone(), Some(40));

        let mut b = burst(&pools, 32, 0, 777);
        bp.handle(&mut b, 5);
        assert!(port.sent.lock().is_empty());

        let mut b = burst(&pools, 4, 6, 888);
        bp.handle(&mut b, 5);

        let sent = port.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), HEADER_END);
        let hdr = TelemetryHeader::decode(&sent[0]).unwrap();
        assert!(hdr.has_magic());
        assert_eq!(hdr.send_timestamp, 888);
        assert_eq!(hdr.sample_index[0], 0);
        assert_eq!(hdr.sample_value[0], 5 + 3);
        assert_eq!(hdr.sample_index[1], 1);
        assert_eq!(hdr.sample_value[1], 4);
        assert_eq!(hdr.sample_index[2], telemetry::UNUSED_SAMPLE);
        assert_eq!(hdr.primary_processed, 36);
        assert_eq!(hdr.secondary_processed, 6);
        assert_eq!(&sent[0][36..38], &100u16.to_be_bytes());
        assert_eq!(stats.snapshot().cores[0].transmitted, 1);
    }

    #[test]
    fn test_transmit_failure_is_counted_not_fatal() {
        let pools = pools();
        let port = CapturePort::new(0, false);
        let (mut bp, calls, stats) = lane(port, pools.clone(), Some(0));
        for _ in 0..3 {
            let mut b = burst(&pools, 1, 0, 1);
            bp.handle(&mut b, 0);
        }
        assert_eq!(*calls.lock(), 3);
        assert_eq!(stats.snapshot().cores[0].tx_failed, 3);
        assert_eq!(bp.telemetry.tx_pool.allocated(), 0);
    }

    #[test]
    fn test_processing_core_drains_queue() {
        let pools = pools();
        let port = CapturePort::new(0, true);
        let (bp, calls, _stats) = lane(port, pools.clone(), None);
        let (mut tx, rx) = swq::channel(128);
        for b in burst(&pools, 40, 0, 1) {
            tx.try_push(b).unwrap();
        }
        let mut core = ProcessingCore::new(0, rx, bp);
        assert_eq!(core.poll_once(), 32);
        assert_eq!(core.poll_once(), 8);
        assert_eq!(core.poll_once(), 0);
        assert_eq!(*calls.lock(), 40);

        for b in burst(&pools, 5, 0, 1) {
            tx.try_push(b).unwrap();
        }
        drop(tx);
        let shutdown = Shutdown::new();
        shutdown.trigger();
        core.run(shutdown);
        assert_eq!(pools.get(Tier::Primary).unwrap().allocated(), 0);
    }

    #[test]
    fn test_push_after_shutdown_is_released() {
        let pools = pools();
        let port = CapturePort::new(0, true);
        let (bp, calls, _stats) = lane(port, pools.clone(), None);
        let (mut tx, rx) = swq::channel(128);
        let core = ProcessingCore::new(0, rx, bp);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let core_shutdown = shutdown.clone();
        let h = std::thread::spawn(move || core.run(core_shutdown));
        std::thread::sleep(std::time::Duration::from_millis(20));
        // the poller finishes a burst it started before seeing the flag
        let mut late = burst(&pools, 3, 0, 1);
        assert_eq!(tx.push_burst_blocking(&mut late, &shutdown), 3);
        assert!(!h.is_finished());
        drop(tx);
        h.join().unwrap();

        assert_eq!(*calls.lock(), 0);
        assert_eq!(pools.get(Tier::Primary).unwrap().allocated(), 0);
    }
}
