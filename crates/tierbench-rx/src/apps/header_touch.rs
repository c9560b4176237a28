use super::PacketProcessor;
use std::fmt::Write;

const SRC_PORT_BUCKETS: usize = 8;
const UDP_SRC: usize = 34;
const UDP_DST: usize = 36;

/// Histogram of UDP destination-port low bits and source-port buckets
#[derive(Debug, Default)]
pub struct HeaderTouch {
    dst_low_bits: [u64; 4],
    src_buckets: [u64; SRC_PORT_BUCKETS],
}

impl PacketProcessor for HeaderTouch {
    #[inline]
    fn process(&mut self, pkt: &mut [u8]) {
        if pkt.len() < UDP_DST + 2 {
            return;
        }
        let src = u16::from_be_bytes([pkt[UDP_SRC], pkt[UDP_SRC + 1]]);
        let dst = u16::from_be_bytes([pkt[UDP_DST], pkt[UDP_DST + 1]]);
        self.dst_low_bits[(dst & 0x3) as usize] += 1;
        self.src_buckets[src as usize % SRC_PORT_BUCKETS] += 1;
    }

    fn stats(&self) -> String {
        let mut out = String::from("header-touch dst port low bits:");
        for (bits, n) in ["00", "01", "10", "11"].iter().zip(self.dst_low_bits) {
            let _ = write!(out, " [{bits}]={n}");
        }
        out.push_str("\nheader-touch src port buckets:");
        for (i, n) in self.src_buckets.iter().enumerate() {
            let _ = write!(out, " [{i}]={n}");
        }
        out
    }
}
