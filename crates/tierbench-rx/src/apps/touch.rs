use super::PacketProcessor;
use tierbench_common::CycleClock;

/// Pull every cache line of the packet in, then spin `wait_ns` per burst
pub struct Touch {
    wait_ns: u64,
    clock: CycleClock,
    sink: u64,
}

impl Touch {
    pub fn new(wait_ns: u64, clock: CycleClock) -> Self {
        Self {
            wait_ns,
            clock,
            sink: 0,
        }
    }
}

impl PacketProcessor for Touch {
    #[inline]
    fn process(&mut self, pkt: &mut [u8]) {
        for line in pkt.iter().step_by(64) {
            self.sink = self.sink.wrapping_add(*line as u64);
        }
        std::hint::black_box(self.sink);
    }

    fn end_burst(&mut self) {
        self.clock.spin_ns(self.wait_ns);
    }

    fn stats(&self) -> String {
        format!("touch: wait {} ns per burst", self.wait_ns)
    }
}
