//! Telemetry Correlator
//!
//! Receives telemetry packets reflected by the receive side. For each one it
//! derives a latency and keeps the occupancy samples it carries:
//!
//! | Timestamping | Latency |
//! |--------------|---------|
//! | software | now - send_timestamp, cycles to ns; magic required |
//! | hardware | (hw_rx - hw_tx) × 4 ns |
//!
//! A software-stamped packet without the magic marker yields
//! [`INVALID_LATENCY`]. The magic marker is cleared once consumed.
//!
//! With a rate register configured, the consumption rate carried by the
//! last packet of every burst is written to it.

use crate::occupancy::{OccupancyLog, OccupancySample};
use crate::register::RateRegister;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tierbench_common::telemetry::{field, HW_TICK_NS};
use tierbench_common::{
    BufferPool, CycleClock, NicPort, PacketBuffer, Shutdown, StatsRegistry, TelemetryHeader,
    BURST_SIZE,
};

/// Latency of a packet that carried no usable timestamp
pub const INVALID_LATENCY: u64 = u64::MAX;

/// Everything one correlator collected
#[derive(Debug, Clone, Serialize)]
pub struct CorrelatorOutput {
    pub lane: u16,
    pub latencies: Vec<u64>,
    pub invalid: u64,
    pub occupancy: OccupancyLog,
    pub register_errors: u64,
}

/// Telemetry receiver of one core
pub struct Correlator {
    lane: u16,
    stats_idx: usize,
    port: Arc<dyn NicPort>,
    queue: u16,
    pool: Arc<BufferPool>,
    clock: CycleClock,
    software_timestamp: bool,
    sample_cap: usize,
    register: Option<Arc<Mutex<RateRegister>>>,
    stats: Arc<StatsRegistry>,
    latencies: Vec<u64>,
    invalid: u64,
    occupancy: OccupancyLog,
    register_errors: u64,
    burst: Vec<PacketBuffer>,
}

impl Correlator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lane: u16,
        stats_idx: usize,
        port: Arc<dyn NicPort>,
        queue: u16,
        pool: Arc<BufferPool>,
        clock: CycleClock,
        software_timestamp: bool,
        sample_cap: usize,
        register: Option<Arc<Mutex<RateRegister>>>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            lane,
            stats_idx,
            port,
            queue,
            pool,
            clock,
            software_timestamp,
            sample_cap,
            register,
            stats,
            latencies: Vec::with_capacity(sample_cap.min(1 << 20)),
            invalid: 0,
            occupancy: OccupancyLog::new(sample_cap),
            register_errors: 0,
            burst: Vec::with_capacity(BURST_SIZE),
        }
    }

    /// Latency of one packet in ns; clears the magic marker
    #[inline]
    pub fn latency(&self, hdr: &TelemetryHeader, frame: &mut [u8], now: u64) -> u64 {
        if self.software_timestamp {
            if !hdr.has_magic() {
                return INVALID_LATENCY;
            }
            field::clear_magic(frame);
            self.clock
                .cycles_to_ns(now.wrapping_sub(hdr.send_timestamp))
        } else {
            hdr.hw_rx_timestamp
                .wrapping_sub(hdr.hw_tx_timestamp)
                .wrapping_mul(HW_TICK_NS)
        }
    }

    /// Correlate every packet of `burst` and release it
    pub fn handle_burst(&mut self, burst: &mut Vec<PacketBuffer>) {
        let Some(last) = burst.len().checked_sub(1) else {
            return;
        };
        let now = self.clock.now();
        let mut bytes = 0u64;
        let mut last_rate = None;

        for (i, buf) in burst.iter_mut().enumerate() {
            bytes += buf.len() as u64;
            let Some(hdr) = TelemetryHeader::decode(buf.data()) else {
                continue;
            };

            let latency = self.latency(&hdr, buf.data_mut(), now);
            if latency == INVALID_LATENCY {
                if self.invalid == 0 {
                    tracing::warn!(lane = self.lane, "telemetry packet without send timestamp");
                }
                self.invalid += 1;
            } else if self.latencies.len() < self.sample_cap {
                self.latencies.push(latency);
            }

            if hdr.has_magic() {
                for s in hdr.samples() {
                    self.occupancy.record(
                        s.index,
                        OccupancySample {
                            sample: s.value,
                            rx_timestamp_ns: hdr.hw_rx_timestamp.wrapping_mul(HW_TICK_NS),
                            primary_processed: hdr.primary_processed,
                            secondary_processed: hdr.secondary_processed,
                        },
                    );
                }
            }

            if i == last {
                last_rate = Some(hdr.consumption_rate);
            }
        }

        if let (Some(reg), Some(rate)) = (&self.register, last_rate) {
            if let Err(e) = reg.lock().write_rate(rate) {
                if self.register_errors == 0 {
                    tracing::warn!(lane = self.lane, error = %e, "rate register write failed");
                }
                self.register_errors += 1;
            }
        }

        let n = burst.len() as u64;
        let counters = self.stats.core(self.stats_idx);
        counters.record_rx(n, bytes);
        self.stats.record_ring(self.queue, n);
        self.pool.free_bulk(burst.drain(..));
    }

    /// One receive poll; returns packets handled
    #[inline]
    pub fn poll_once(&mut self) -> usize {
        let mut burst = std::mem::take(&mut self.burst);
        let n = self.port.rx_burst(self.queue, &mut burst, BURST_SIZE);
        if n != 0 {
            self.handle_burst(&mut burst);
        }
        self.burst = burst;
        n
    }

    pub fn run(mut self, shutdown: Shutdown) -> CorrelatorOutput {
        tracing::debug!(lane = self.lane, queue = self.queue, "correlator started");
        while shutdown.is_running() {
            self.poll_once();
        }
        tracing::debug!(
            lane = self.lane,
            latencies = self.latencies.len(),
            invalid = self.invalid,
            "correlator stopped"
        );
        self.into_output()
    }

    pub fn into_output(self) -> CorrelatorOutput {
        CorrelatorOutput {
            lane: self.lane,
            latencies: self.latencies,
            invalid: self.invalid,
            occupancy: self.occupancy,
            register_errors: self.register_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap2::MmapMut;
    use tierbench_common::telemetry::{HEADER_END, MAGIC, SAMPLE_SLOTS, UNUSED_SAMPLE};

    struct NullPort;

    impl NicPort for NullPort {
        fn rx_burst(&self, _q: u16, _out: &mut Vec<PacketBuffer>, _max: usize) -> usize {
            0
        }
        fn tx_burst(&self, _q: u16, pkts: &[PacketBuffer]) -> usize {
            pkts.len()
        }
        fn rx_queue_count(&self, _q: u16) -> usize {
            0
        }
        fn socket_id(&self) -> Option<usize> {
            None
        }
    }

    const HZ: u64 = 2_000_000_000;

    fn correlator(sw: bool, cap: usize, register: Option<Arc<Mutex<RateRegister>>>) -> Correlator {
        Correlator::new(
            0,
            0,
            Arc::new(NullPort),
            0,
            Arc::new(BufferPool::new("corr", 0, 64, 128).unwrap()),
            CycleClock::with_hz(HZ),
            sw,
            cap,
            register,
            Arc::new(StatsRegistry::new(1, 1)),
        )
    }

    fn packet(c: &Correlator, hdr: TelemetryHeader) -> PacketBuffer {
        let mut b = c.pool.alloc().unwrap();
        if let Some(f) = b.append(HEADER_END + 8) {
            hdr.encode(f);
        }
        b
    }

    #[test]
    fn test_software_latency() {
        let c = correlator(true, 10, None);
        let t = 1_000_000u64;
        let hdr = TelemetryHeader {
            magic: MAGIC,
            send_timestamp: t,
            ..Default::default()
        };
        let mut frame = vec![0u8; HEADER_END];
        hdr.encode(&mut frame);
        // 3000 cycles at 2 GHz
        assert_eq!(c.latency(&hdr, &mut frame, t + 3000), 1500);
        assert_eq!(field::magic(&frame), Some(0));

        let cleared = TelemetryHeader::decode(&frame).unwrap();
        assert_eq!(c.latency(&cleared, &mut frame, t + 3000), INVALID_LATENCY);
    }

    #[test]
    fn test_hardware_latency() {
        let c = correlator(false, 10, None);
        let hdr = TelemetryHeader {
            hw_tx_timestamp: 1000,
            hw_rx_timestamp: 1250,
            ..Default::default()
        };
        let mut frame = vec![0u8; HEADER_END];
        assert_eq!(c.latency(&hdr, &mut frame, 0), 1000);
    }

    #[test]
    fn test_burst_collects_samples_and_caps() {
        let mut c = correlator(false, 3, None);
        let mut burst = Vec::new();
        for i in 0..5u16 {
            let mut idx = [UNUSED_SAMPLE; SAMPLE_SLOTS];
            let mut val = [0u16; SAMPLE_SLOTS];
            idx[0] = 0;
            val[0] = 10 + i;
            idx[1] = 4;
            val[1] = i;
            let magic = if i == 1 { 0 } else { MAGIC };
            burst.push(packet(
                &c,
                TelemetryHeader {
                    magic,
                    sample_index: idx,
                    sample_value: val,
                    hw_tx_timestamp: 100,
                    hw_rx_timestamp: 200 + i as u64,
                    primary_processed: 33,
                    secondary_processed: 1,
                    ..Default::default()
                },
            ));
        }
        c.handle_burst(&mut burst);
        assert!(burst.is_empty());
        assert_eq!(c.pool.allocated(), 0);

        let out = c.into_output();
        assert_eq!(out.latencies, vec![400, 404, 408]);
        assert_eq!(out.invalid, 0);
        let ring0: Vec<u16> = out.occupancy.ring(0).iter().map(|s| s.sample).collect();
        // packet 1 carried no magic, packet 4 is past the cap
        assert_eq!(ring0, vec![10, 12, 13]);
        assert_eq!(out.occupancy.ring(4).len(), 3);
        assert_eq!(out.occupancy.ring(0)[1].rx_timestamp_ns, 202 * 4);
    }

    #[test]
    fn test_missing_magic_counts_invalid() {
        let mut c = correlator(true, 10, None);
        let mut burst = vec![packet(&c, TelemetryHeader::default())];
        c.handle_burst(&mut burst);
        let out = c.into_output();
        assert!(out.latencies.is_empty());
        assert_eq!(out.invalid, 1);
        assert!(out.occupancy.is_empty());
    }

    #[test]
    fn test_invalid_latencies_do_not_fill_cap() {
        let mut c = correlator(true, 2, None);
        let t = c.clock.now();
        let mut burst: Vec<_> = (0..3).map(|_| packet(&c, TelemetryHeader::default())).collect();
        for _ in 0..2 {
            burst.push(packet(
                &c,
                TelemetryHeader {
                    magic: MAGIC,
                    send_timestamp: t,
                    ..Default::default()
                },
            ));
        }
        c.handle_burst(&mut burst);
        let out = c.into_output();
        assert_eq!(out.invalid, 3);
        assert_eq!(out.latencies.len(), 2);
        assert!(out.latencies.iter().all(|&l| l != INVALID_LATENCY));
    }

    #[test]
    fn test_register_gets_last_rate() {
        let reg = Arc::new(Mutex::new(RateRegister::from_map(
            MmapMut::map_anon(4096).unwrap(),
            0,
            0x10,
        )));
        let mut c = correlator(false, 10, Some(reg.clone()));
        let mut burst: Vec<_> = [300u64, 700]
            .iter()
            .map(|r| {
                packet(
                    &c,
                    TelemetryHeader {
                        consumption_rate: *r,
                        ..Default::default()
                    },
                )
            })
            .collect();
        c.handle_burst(&mut burst);
        assert_eq!(reg.lock().read_u32(0x10).unwrap(), 700);
    }
}
