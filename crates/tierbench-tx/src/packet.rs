//! UDP test packets
//!
//! Frames are Ethernet + IPv4 + UDP followed by the telemetry header and a
//! random payload. The IPv4 header checksum is valid; the UDP checksum is
//! zero (not computed) since the source port is rewritten before every
//! burst.

use crate::error::{TxError, TxResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tierbench_common::buffer::MAX_FRAME_SIZE;
use tierbench_common::telemetry::{self, field, L2L4_LEN, SAMPLE_SLOTS};

/// Smallest Ethernet frame without CRC
pub const MIN_FRAME_SIZE: usize = 60;

/// Destination port that steers to the primary tier
pub const PRIMARY_DST_PORT: u16 = 100;

/// Destination port that steers to the secondary tiers (low bits `10`)
pub const SECONDARY_DST_PORT: u16 = 102;

const ETH_LEN: usize = 14;
const IPV4_LEN: usize = 20;
const IP_CSUM: usize = ETH_LEN + 10;
const IP_ID: usize = ETH_LEN + 4;
const IP_SRC: usize = ETH_LEN + 12;
const UDP_SRC: usize = ETH_LEN + IPV4_LEN;

/// Ethernet address, written as `xx:xx:xx:xx:xx:xx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = TxError;

    fn from_str(s: &str) -> TxResult<Self> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for b in out.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| TxError::Config(format!("invalid MAC {s}")))?;
            if part.len() != 2 {
                return Err(TxError::Config(format!("invalid MAC {s}")));
            }
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| TxError::Config(format!("invalid MAC {s}")))?;
        }
        if parts.next().is_some() {
            return Err(TxError::Config(format!("invalid MAC {s}")));
        }
        Ok(Self(out))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Addressing and size of generated frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSpec {
    pub size: usize,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

/// Check a frame size against the Ethernet limits
pub fn check_size(size: usize) -> TxResult<()> {
    if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&size) {
        return Err(TxError::PacketSize {
            size,
            min: MIN_FRAME_SIZE,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// One's-complement checksum of an IPv4 header
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for (i, pair) in header.chunks(2).enumerate() {
        if i == 5 {
            // checksum field itself
            continue;
        }
        let word = match pair {
            [a, b] => u16::from_be_bytes([*a, *b]),
            [a] => u16::from_be_bytes([*a, 0]),
            _ => 0,
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Write a complete test frame into `frame` (must be `spec.size` long)
pub fn build_udp_frame(
    frame: &mut [u8],
    spec: &PacketSpec,
    ip_id: u16,
    src_port: u16,
    dst_port: u16,
    rng: &mut impl Rng,
) {
    let len = frame.len();

    frame[0..6].copy_from_slice(&spec.dst_mac.0);
    frame[6..12].copy_from_slice(&spec.src_mac.0);
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

    let ip = &mut frame[ETH_LEN..ETH_LEN + IPV4_LEN];
    ip[0] = 0x45;
    ip[1] = 2;
    ip[2..4].copy_from_slice(&((len - ETH_LEN) as u16).to_be_bytes());
    ip[4..6].copy_from_slice(&ip_id.to_be_bytes());
    ip[6..8].fill(0);
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&spec.src_ip.octets());
    ip[16..20].copy_from_slice(&spec.dst_ip.octets());
    let csum = ipv4_checksum(ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());

    let udp = &mut frame[UDP_SRC..L2L4_LEN];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&((len - ETH_LEN - IPV4_LEN) as u16).to_be_bytes());
    udp[6..8].fill(0);

    let header = telemetry::TelemetryHeader {
        sample_index: [telemetry::UNUSED_SAMPLE; SAMPLE_SLOTS],
        magic: telemetry::MAGIC,
        ..Default::default()
    };
    header.encode(frame);
    if len > telemetry::HEADER_END {
        rng.fill(&mut frame[telemetry::HEADER_END..]);
    }
}

/// Rewrite the UDP source port, and optionally the IPv4 source address
#[inline]
pub fn refresh_source(frame: &mut [u8], rng: &mut impl Rng, random_src_ip: bool) {
    if frame.len() < L2L4_LEN {
        return;
    }
    let port: u16 = rng.gen();
    frame[UDP_SRC..UDP_SRC + 2].copy_from_slice(&port.to_be_bytes());
    if random_src_ip {
        let ip: u32 = rng.gen_range(1..=u32::MAX);
        frame[IP_SRC..IP_SRC + 4].copy_from_slice(&ip.to_be_bytes());
        let csum = ipv4_checksum(&frame[ETH_LEN..ETH_LEN + IPV4_LEN]);
        frame[IP_CSUM..IP_CSUM + 2].copy_from_slice(&csum.to_be_bytes());
    }
}

/// Stamp a software send timestamp and the magic marker
#[inline(always)]
pub fn stamp_send(frame: &mut [u8], cycles: u64) {
    field::stamp(frame, cycles);
}

/// IPv4 identification field
pub fn ip_id(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[IP_ID], frame[IP_ID + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tierbench_common::TelemetryHeader;

    fn spec(size: usize) -> PacketSpec {
        PacketSpec {
            size,
            src_mac: "02:00:00:00:00:01".parse().unwrap(),
            dst_mac: "02:00:00:00:00:02".parse().unwrap(),
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
        }
    }

    fn verify_ip(frame: &[u8]) -> bool {
        let hdr = &frame[ETH_LEN..ETH_LEN + IPV4_LEN];
        let mut sum: u32 = hdr
            .chunks(2)
            .map(|p| u16::from_be_bytes([p[0], p[1]]) as u32)
            .sum();
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        sum == 0xFFFF
    }

    #[test]
    fn test_mac_parse() {
        let m: MacAddr = "aa:BB:0c:00:01:ff".parse().unwrap();
        assert_eq!(m.0, [0xaa, 0xbb, 0x0c, 0x00, 0x01, 0xff]);
        assert_eq!(m.to_string(), "aa:bb:0c:00:01:ff");
        assert!("aa:bb:cc".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_known_checksum() {
        // classic example header
        let hdr = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(ipv4_checksum(&hdr), 0xb861);
    }

    #[test]
    fn test_frame_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut frame = vec![0u8; 128];
        build_udp_frame(&mut frame, &spec(128), 3, 4242, PRIMARY_DST_PORT, &mut rng);

        assert_eq!(&frame[12..14], &[0x08, 0x00]);
        assert_eq!(frame[23], 17);
        assert!(verify_ip(&frame));
        assert_eq!(u16::from_be_bytes([frame[16], frame[17]]), 114);
        assert_eq!(u16::from_be_bytes([frame[34], frame[35]]), 4242);
        assert_eq!(u16::from_be_bytes([frame[36], frame[37]]), 100);
        assert_eq!(u16::from_be_bytes([frame[38], frame[39]]), 94);
        assert_eq!(ip_id(&frame), 3);

        let hdr = TelemetryHeader::decode(&frame).unwrap();
        assert!(hdr.has_magic());
        assert_eq!(hdr.samples().count(), 0);
    }

    #[test]
    fn test_refresh_keeps_checksum_valid() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut frame = vec![0u8; 64];
        build_udp_frame(&mut frame, &spec(64), 1, 1, PRIMARY_DST_PORT, &mut rng);
        let before = frame[IP_SRC..IP_SRC + 4].to_vec();
        refresh_source(&mut frame, &mut rng, true);
        assert_ne!(&frame[IP_SRC..IP_SRC + 4], &before[..]);
        assert!(verify_ip(&frame));
    }

    #[test]
    fn test_size_bounds() {
        assert!(check_size(59).is_err());
        assert!(check_size(60).is_ok());
        assert!(check_size(9018).is_ok());
        assert!(matches!(
            check_size(9019),
            Err(TxError::PacketSize { size: 9019, .. })
        ));
    }
}
