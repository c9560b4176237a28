//! Telemetry Wire Format
//!
//! Measurement header carried right after the Ethernet/IPv4/UDP headers.
//! Packed, little-endian, fixed offsets:
//!
//! | Offset | Field | Width |
//! |--------|-------|-------|
//! | 42 | send_timestamp | u64 |
//! | 50 | magic | u16 |
//! | 52 | tier_sample_index\[4\] | u8 ×4 |
//! | 56 | tier_sample_value\[4\] | u16 ×4 |
//! | 64 | hw_tx_timestamp | u64 |
//! | 72 | hw_rx_timestamp | u64 |
//! | 80 | primary_processed_count | u16 |
//! | 82 | secondary_processed_count | u16 |
//! | 84 | consumption_rate | u64 |

/// Ethernet + IPv4 + UDP
pub const L2L4_LEN: usize = 14 + 20 + 8;

/// Marks a valid software send timestamp
pub const MAGIC: u16 = 0xDEAD;

/// Sample slot not in use
pub const UNUSED_SAMPLE: u8 = 255;

/// Occupancy samples per header
pub const SAMPLE_SLOTS: usize = 4;

/// Nanoseconds per hardware timestamp tick
pub const HW_TICK_NS: u64 = 4;

const SEND_TS: usize = L2L4_LEN;
const MAGIC_OFF: usize = SEND_TS + 8;
const SAMPLE_INDEX: usize = MAGIC_OFF + 2;
const SAMPLE_VALUE: usize = SAMPLE_INDEX + SAMPLE_SLOTS;
const HW_TX: usize = SAMPLE_VALUE + 2 * SAMPLE_SLOTS;
const HW_RX: usize = HW_TX + 8;
const PRIMARY_COUNT: usize = HW_RX + 8;
const SECONDARY_COUNT: usize = PRIMARY_COUNT + 2;
const RATE: usize = SECONDARY_COUNT + 2;

/// First byte past the header
pub const HEADER_END: usize = RATE + 8;

const _: () = assert!(HW_TX == 64 && HW_RX == 72 && HEADER_END == 92);

/// One occupancy sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSample {
    /// Ring / tier index the sample describes
    pub index: u8,
    /// Occupancy or sequence value
    pub value: u16,
}

/// Decoded telemetry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHeader {
    pub send_timestamp: u64,
    pub magic: u16,
    pub sample_index: [u8; SAMPLE_SLOTS],
    pub sample_value: [u16; SAMPLE_SLOTS],
    pub hw_tx_timestamp: u64,
    pub hw_rx_timestamp: u64,
    pub primary_processed: u16,
    pub secondary_processed: u16,
    /// Rolling bytes-per-microsecond estimate
    pub consumption_rate: u64,
}

impl Default for TelemetryHeader {
    fn default() -> Self {
        Self {
            send_timestamp: 0,
            magic: 0,
            sample_index: [UNUSED_SAMPLE; SAMPLE_SLOTS],
            sample_value: [0; SAMPLE_SLOTS],
            hw_tx_timestamp: 0,
            hw_rx_timestamp: 0,
            primary_processed: 0,
            secondary_processed: 0,
            consumption_rate: 0,
        }
    }
}

#[inline(always)]
fn rd_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

#[inline(always)]
fn rd_u64(b: &[u8], at: usize) -> u64 {
    let mut v = [0u8; 8];
    v.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(v)
}

#[inline(always)]
fn wr_u16(b: &mut [u8], at: usize, v: u16) {
    b[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline(always)]
fn wr_u64(b: &mut [u8], at: usize, v: u64) {
    b[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

impl TelemetryHeader {
    /// Decode from a frame; `None` when the frame is too short
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < HEADER_END {
            return None;
        }
        let mut sample_index = [UNUSED_SAMPLE; SAMPLE_SLOTS];
        sample_index.copy_from_slice(&frame[SAMPLE_INDEX..SAMPLE_INDEX + SAMPLE_SLOTS]);
        let mut sample_value = [0u16; SAMPLE_SLOTS];
        for (i, v) in sample_value.iter_mut().enumerate() {
            *v = rd_u16(frame, SAMPLE_VALUE + 2 * i);
        }
        Some(Self {
            send_timestamp: rd_u64(frame, SEND_TS),
            magic: rd_u16(frame, MAGIC_OFF),
            sample_index,
            sample_value,
            hw_tx_timestamp: rd_u64(frame, HW_TX),
            hw_rx_timestamp: rd_u64(frame, HW_RX),
            primary_processed: rd_u16(frame, PRIMARY_COUNT),
            secondary_processed: rd_u16(frame, SECONDARY_COUNT),
            consumption_rate: rd_u64(frame, RATE),
        })
    }

    /// Encode into a frame; returns false when the frame is too short
    pub fn encode(&self, frame: &mut [u8]) -> bool {
        if frame.len() < HEADER_END {
            return false;
        }
        wr_u64(frame, SEND_TS, self.send_timestamp);
        wr_u16(frame, MAGIC_OFF, self.magic);
        frame[SAMPLE_INDEX..SAMPLE_INDEX + SAMPLE_SLOTS].copy_from_slice(&self.sample_index);
        for (i, v) in self.sample_value.iter().enumerate() {
            wr_u16(frame, SAMPLE_VALUE + 2 * i, *v);
        }
        wr_u64(frame, HW_TX, self.hw_tx_timestamp);
        wr_u64(frame, HW_RX, self.hw_rx_timestamp);
        wr_u16(frame, PRIMARY_COUNT, self.primary_processed);
        wr_u16(frame, SECONDARY_COUNT, self.secondary_processed);
        wr_u64(frame, RATE, self.consumption_rate);
        true
    }

    /// Whether the magic marker is set
    #[inline]
    pub fn has_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Used sample slots
    pub fn samples(&self) -> impl Iterator<Item = TierSample> + '_ {
        self.sample_index
            .iter()
            .zip(self.sample_value.iter())
            .filter(|(idx, _)| **idx != UNUSED_SAMPLE)
            .map(|(idx, value)| TierSample {
                index: *idx,
                value: *value,
            })
    }
}

/// In-place field access for the hot paths. Frames shorter than the header
/// are left untouched.
pub mod field {
    use super::*;

    /// Read the magic marker
    #[inline(always)]
    pub fn magic(frame: &[u8]) -> Option<u16> {
        (frame.len() >= HEADER_END).then(|| rd_u16(frame, MAGIC_OFF))
    }

    /// Write magic and send timestamp
    #[inline(always)]
    pub fn stamp(frame: &mut [u8], send_timestamp: u64) {
        if frame.len() >= HEADER_END {
            wr_u64(frame, SEND_TS, send_timestamp);
            wr_u16(frame, MAGIC_OFF, MAGIC);
        }
    }

    /// Clear the magic marker
    #[inline(always)]
    pub fn clear_magic(frame: &mut [u8]) {
        if frame.len() >= HEADER_END {
            wr_u16(frame, MAGIC_OFF, 0);
        }
    }

    /// Write the hardware transmit timestamp
    #[inline(always)]
    pub fn set_hw_tx(frame: &mut [u8], ticks: u64) {
        if frame.len() >= HEADER_END {
            wr_u64(frame, HW_TX, ticks);
        }
    }

    /// Write the hardware receive timestamp
    #[inline(always)]
    pub fn set_hw_rx(frame: &mut [u8], ticks: u64) {
        if frame.len() >= HEADER_END {
            wr_u64(frame, HW_RX, ticks);
        }
    }

    /// Reset every sample slot to unused
    #[inline(always)]
    pub fn clear_samples(frame: &mut [u8]) {
        if frame.len() >= HEADER_END {
            frame[SAMPLE_INDEX..SAMPLE_INDEX + SAMPLE_SLOTS].fill(UNUSED_SAMPLE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets_match_wire() {
        let mut frame = vec![0u8; 128];
        let hdr = TelemetryHeader {
            send_timestamp: 0x0102_0304_0506_0708,
            magic: MAGIC,
            sample_index: [3, UNUSED_SAMPLE, 7, UNUSED_SAMPLE],
            sample_value: [10, 0, 70, 0],
            hw_tx_timestamp: 1000,
            hw_rx_timestamp: 1250,
            primary_processed: 33,
            secondary_processed: 5,
            consumption_rate: 900,
        };
        assert!(hdr.encode(&mut frame));

        assert_eq!(&frame[42..50], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&frame[50..52], &0xDEADu16.to_le_bytes());
        assert_eq!(&frame[64..72], &1000u64.to_le_bytes());
        assert_eq!(&frame[72..80], &1250u64.to_le_bytes());
        assert_eq!(TelemetryHeader::decode(&frame), Some(hdr));
    }

    #[test]
    fn test_samples_skip_unused() {
        let hdr = TelemetryHeader {
            sample_index: [1, UNUSED_SAMPLE, 5, UNUSED_SAMPLE],
            sample_value: [11, 99, 55, 99],
            ..Default::default()
        };
        let got: Vec<_> = hdr.samples().collect();
        assert_eq!(
            got,
            vec![
                TierSample { index: 1, value: 11 },
                TierSample { index: 5, value: 55 }
            ]
        );
    }

    #[test]
    fn test_short_frame() {
        let mut short = [0u8; 60];
        assert!(TelemetryHeader::decode(&short).is_none());
        assert!(!TelemetryHeader::default().encode(&mut short));
        field::stamp(&mut short, 5);
        assert_eq!(short, [0u8; 60]);
        assert_eq!(field::magic(&short), None);
    }

    #[test]
    fn test_stamp_and_clear() {
        let mut frame = [0u8; HEADER_END];
        field::stamp(&mut frame, 77);
        let hdr = TelemetryHeader::decode(&frame).unwrap();
        assert!(hdr.has_magic());
        assert_eq!(hdr.send_timestamp, 77);
        field::clear_magic(&mut frame);
        assert_eq!(field::magic(&frame), Some(0));
    }
}
