//! Link rate model
//!
//! Every frame costs `size + 4` (CRC) `+ 20` (preamble, SFD, inter-frame gap)
//! bytes on the wire. The link's packet rate is split evenly over the
//! transmit cores, and each burst gets a per-core packet target:
//!
//! ```text
//! target = round(max_pps * duration_us / 1e6 / cores)
//! ```

use crate::packet::MIN_FRAME_SIZE;
use crate::schedule::BurstSchedule;

/// Ethernet CRC
pub const CRC_LEN: usize = 4;
/// Preamble (7) + SFD (1) + inter-frame gap (12)
pub const WIRE_OVERHEAD: usize = 20;

/// Packet rate limits for one configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateModel {
    max_pps: f64,
    packet_size: usize,
    cores: u16,
}

impl RateModel {
    /// Rate of a `link_gbps` link carrying `packet_size`-byte frames
    pub fn for_link(link_gbps: f64, packet_size: usize, cores: u16) -> Self {
        let on_wire = (wire_bytes(packet_size) * 8) as f64;
        Self {
            max_pps: link_gbps * 1e9 / on_wire,
            packet_size,
            cores: cores.max(1),
        }
    }

    /// Rate from a known link packet rate, for minimum-size frames
    pub fn from_max_pps(max_pps: f64, cores: u16) -> Self {
        Self {
            max_pps,
            packet_size: MIN_FRAME_SIZE,
            cores: cores.max(1),
        }
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// On-wire bytes of one frame
    pub fn wire_bytes(&self) -> usize {
        wire_bytes(self.packet_size)
    }

    pub fn cores(&self) -> u16 {
        self.cores
    }

    /// Packets per second the link carries
    pub fn max_pps(&self) -> f64 {
        self.max_pps
    }

    /// Share of the link per core
    pub fn per_core_pps(&self) -> f64 {
        self.max_pps / self.cores as f64
    }

    /// Packets one core sends in a burst of `duration_us`
    pub fn target(&self, duration_us: u32) -> u64 {
        (self.max_pps * (duration_us as f64 / 1e6) / self.cores as f64).round() as u64
    }

    /// Per-core target of every schedule entry
    pub fn targets(&self, schedule: &BurstSchedule) -> Vec<u64> {
        schedule
            .entries()
            .iter()
            .map(|e| self.target(e.duration_us))
            .collect()
    }
}

/// Bytes a frame occupies on the wire
pub fn wire_bytes(packet_size: usize) -> usize {
    packet_size + CRC_LEN + WIRE_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::BurstEntry;

    #[test]
    fn test_target_250() {
        let r = RateModel::from_max_pps(10_000_000.0, 4);
        assert_eq!(r.target(100), 250);
        assert_eq!(r.per_core_pps(), 2_500_000.0);
    }

    #[test]
    fn test_100g_min_frames() {
        // 60 B frames are 84 B on the wire: 148.8 Mpps at 100 Gb/s
        let r = RateModel::for_link(100.0, 60, 1);
        assert!((r.max_pps() - 148_809_523.8).abs() < 1.0);
        assert_eq!(r.target(100), 14_881);
    }

    #[test]
    fn test_targets_follow_schedule() {
        let s = BurstSchedule::new(vec![
            BurstEntry {
                duration_us: 100,
                gap_us: 0,
            },
            BurstEntry {
                duration_us: 10,
                gap_us: 5,
            },
        ])
        .unwrap();
        let r = RateModel::from_max_pps(1_000_000.0, 2);
        assert_eq!(r.targets(&s), vec![50, 5]);
    }
}
