//! Run-to-completion worker: one core polls the tiers of its lane and
//! processes every burst in place, with no software queue in between.

use crate::apps::PacketProcessor;
use crate::poller::TieredPoller;
use crate::processor::BurstProcessor;
use tierbench_common::{CycleClock, Shutdown};

/// Poll + process on a single core
pub struct RtcWorker {
    poller: TieredPoller,
    inner: BurstProcessor,
    clock: CycleClock,
}

impl RtcWorker {
    pub fn new(poller: TieredPoller, inner: BurstProcessor, clock: CycleClock) -> Self {
        Self {
            poller,
            inner,
            clock,
        }
    }

    /// One poll; processes whatever arrived. Returns packets handled.
    #[inline]
    pub fn poll_once(&mut self) -> usize {
        let started = self.clock.now();
        let n = self.poller.poll_tiers();
        if n != 0 {
            self.inner.handle(self.poller.burst_mut(), 0);
            self.poller
                .stats()
                .core(self.poller.lane() as usize)
                .record_polling(self.clock.now().wrapping_sub(started));
        }
        n
    }

    pub fn run(mut self, shutdown: Shutdown) -> Box<dyn PacketProcessor> {
        let lane = self.poller.lane();
        tracing::debug!(lane, "rtc worker started");
        while shutdown.is_running() {
            self.poll_once();
        }
        tracing::debug!(lane, "rtc worker stopped");
        self.inner.into_processor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::TierPools;
    use crate::processor::TelemetryPath;
    use crate::tier::{QueueLayout, TierMode, TierState};
    use std::sync::Arc;
    use tierbench_common::{BufferPool, HwStamp, LoopbackPort, NicPort, StatsRegistry};

    struct Seen(Arc<parking_lot::Mutex<u64>>);

    impl PacketProcessor for Seen {
        fn process(&mut self, _pkt: &mut [u8]) {
            *self.0.lock() += 1;
        }
    }

    fn frame(dst_low: u8, src: u16) -> Vec<u8> {
        let mut f = vec![0u8; 128];
        f[12] = 0x08;
        f[14] = 0x45;
        f[23] = 17;
        f[34..36].copy_from_slice(&src.to_be_bytes());
        f[36..38].copy_from_slice(&(100u16 | dst_low as u16).to_be_bytes());
        f
    }

    #[test]
    fn test_processes_both_tiers_and_releases() {
        let layout = QueueLayout::new(1, TierMode::Cxl);
        let pools = Arc::new(TierPools::from_pools(vec![
            Arc::new(BufferPool::new("p", 0, 128, 256).unwrap()),
            Arc::new(BufferPool::new("s", 1, 128, 256).unwrap()),
        ]));
        let mut port = LoopbackPort::new("rtc", layout.total_queues() as u16, 1)
            .with_hw_stamp(HwStamp::Rx);
        for (q, pool) in pools.iter().enumerate() {
            port.setup_rx_queue(q as u16, 64, pool.clone()).unwrap();
        }
        port.set_steering(layout.steering()).unwrap();
        port.start().unwrap();
        let port = Arc::new(port);

        for i in 0..10 {
            assert!(port.deliver(&frame(0, i), HwStamp::None));
        }
        for i in 0..4 {
            assert!(port.deliver(&frame(0b10, i), HwStamp::None));
        }

        let stats = Arc::new(StatsRegistry::new(1, layout.total_queues() as usize));
        let dyn_port: Arc<dyn NicPort> = port.clone();
        let poller = TieredPoller::new(0, &layout, dyn_port.clone(), stats.clone());
        let clock = CycleClock::with_hz(1_000_000_000);
        let seen = Arc::new(parking_lot::Mutex::new(0));
        let inner = BurstProcessor::new(
            0,
            Box::new(Seen(seen.clone())),
            pools.clone(),
            TelemetryPath {
                port: dyn_port,
                tx_queue: 0,
                tx_pool: Arc::new(BufferPool::new("tx", 9, 4, 128).unwrap()),
                primary_queue: 0,
                secondary_queues: vec![1],
                sample_freq: None,
            },
            stats.clone(),
            clock,
        );
        let mut worker = RtcWorker::new(poller, inner, clock);

        assert_eq!(worker.poll_once(), 10);
        assert_eq!(worker.poll_once(), 0);
        assert_eq!(worker.poller.state(), TierState::Secondary);
        assert_eq!(worker.poll_once(), 4);
        assert_eq!(*seen.lock(), 14);

        let snap = stats.snapshot();
        assert_eq!(snap.cores[0].primary_processed, 10);
        assert_eq!(snap.cores[0].secondary_processed, 4);
        assert_eq!(snap.rings, vec![10, 4]);
        for p in pools.iter() {
            assert_eq!(p.allocated(), 0);
        }
    }
}
