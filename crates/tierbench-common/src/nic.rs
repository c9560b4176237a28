//! NIC Port Abstraction
//!
//! The pipeline sees a port only through [`NicPort`]: burst receive from a
//! queue, burst transmit on a queue, and a queue-depth probe. Device bring-up
//! and flow-rule installation live behind the implementation.
//!
//! [`LoopbackPort`] is an in-memory port. Two of them joined with
//! [`LoopbackPort::connect`] behave like a cable with a timestamping switch
//! in the middle: frames sent on one appear on the peer's receive queues,
//! steered by UDP destination port the way the hardware flow rules steer
//! them, copied into buffers from the pool bound to the receiving queue.

use crate::buffer::{BufferPool, PacketBuffer};
use crate::clock::monotonic_ns;
use crate::error::{CommonError, CommonResult};
use crate::telemetry::{self, HW_TICK_NS};
use crate::BURST_SIZE;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Burst-oriented NIC port
pub trait NicPort: Send + Sync {
    /// Move up to `max` received buffers from `queue` into `out`
    fn rx_burst(&self, queue: u16, out: &mut Vec<PacketBuffer>, max: usize) -> usize;

    /// Transmit a prefix of `pkts` on `queue`; returns how many were accepted.
    /// The port copies frames out; the caller keeps ownership of the buffers.
    fn tx_burst(&self, queue: u16, pkts: &[PacketBuffer]) -> usize;

    /// Descriptors currently filled on a receive queue
    fn rx_queue_count(&self, queue: u16) -> usize;

    /// NUMA node the device is attached to, when known
    fn socket_id(&self) -> Option<usize>;
}

/// Hardware timestamp written by the switch on the way through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwStamp {
    /// No stamping
    None,
    /// Stamp `hw_tx_timestamp` on frames leaving this port
    Tx,
    /// Stamp `hw_rx_timestamp` on frames leaving this port
    Rx,
}

/// Flow steering rules
///
/// UDP destination port low bits `00` go to the primary queue set, `10` to
/// the secondary set (primary when no secondary set exists). Within a set the
/// queue is picked by hashing the UDP source port.
#[derive(Debug, Clone, Default)]
pub struct Steering {
    /// Queues of the primary (DDR) tier
    pub primary: Vec<u16>,
    /// Queues of the secondary tiers
    pub secondary: Vec<u16>,
}

impl Steering {
    /// Spread over `queues` with no tier split
    pub fn flat(queues: u16) -> Self {
        Self {
            primary: (0..queues).collect(),
            secondary: Vec::new(),
        }
    }

    /// Pick the receive queue for a frame
    pub fn select(&self, frame: &[u8]) -> Option<u16> {
        if self.primary.is_empty() {
            return None;
        }
        let (src_port, dst_port) = udp_ports(frame).unwrap_or((0, 0));
        let set = if dst_port & 0x3 == 0x2 && !self.secondary.is_empty() {
            &self.secondary
        } else {
            &self.primary
        };
        let hash = (src_port as u32).wrapping_mul(0x9E37_79B1) >> 16;
        Some(set[hash as usize % set.len()])
    }
}

fn udp_ports(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < telemetry::L2L4_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != 0x0800 || frame[23] != 17 {
        return None;
    }
    let l4 = 14 + ((frame[14] & 0x0F) as usize) * 4;
    if l4 + 4 > frame.len() {
        return None;
    }
    Some((
        u16::from_be_bytes([frame[l4], frame[l4 + 1]]),
        u16::from_be_bytes([frame[l4 + 2], frame[l4 + 3]]),
    ))
}

struct RxRing {
    ring: ArrayQueue<PacketBuffer>,
    pool: Arc<BufferPool>,
}

/// In-memory NIC port
pub struct LoopbackPort {
    name: String,
    socket_id: Option<usize>,
    rx_queues: Vec<Option<RxRing>>,
    nb_tx: u16,
    steering: Steering,
    hw_stamp: HwStamp,
    peer: OnceLock<Weak<LoopbackPort>>,
    tx_enabled: AtomicBool,
    rx_missed: AtomicU64,
    tx_packets: AtomicU64,
}

impl LoopbackPort {
    /// Port with `nb_rx` receive and `nb_tx` transmit queues
    pub fn new(name: impl Into<String>, nb_rx: u16, nb_tx: u16) -> Self {
        Self {
            name: name.into(),
            socket_id: None,
            rx_queues: (0..nb_rx).map(|_| None).collect(),
            nb_tx,
            steering: Steering::flat(nb_rx),
            hw_stamp: HwStamp::None,
            peer: OnceLock::new(),
            tx_enabled: AtomicBool::new(true),
            rx_missed: AtomicU64::new(0),
            tx_packets: AtomicU64::new(0),
        }
    }

    /// Record the device NUMA node
    pub fn with_socket(mut self, socket_id: usize) -> Self {
        self.socket_id = Some(socket_id);
        self
    }

    /// Stamp hardware timestamps on transmit
    pub fn with_hw_stamp(mut self, stamp: HwStamp) -> Self {
        self.hw_stamp = stamp;
        self
    }

    /// Install steering rules
    pub fn set_steering(&mut self, steering: Steering) -> CommonResult<()> {
        for q in steering.primary.iter().chain(steering.secondary.iter()) {
            if *q as usize >= self.rx_queues.len() {
                return Err(CommonError::InvalidQueue(*q));
            }
        }
        self.steering = steering;
        Ok(())
    }

    /// Bind a receive queue to a ring size and buffer pool
    pub fn setup_rx_queue(
        &mut self,
        queue: u16,
        ring_size: usize,
        pool: Arc<BufferPool>,
    ) -> CommonResult<()> {
        let slot = self
            .rx_queues
            .get_mut(queue as usize)
            .ok_or(CommonError::InvalidQueue(queue))?;
        if slot.is_some() {
            return Err(CommonError::QueueSetup {
                queue,
                reason: "already configured".into(),
            });
        }
        if ring_size == 0 {
            return Err(CommonError::QueueSetup {
                queue,
                reason: "zero ring size".into(),
            });
        }
        *slot = Some(RxRing {
            ring: ArrayQueue::new(ring_size),
            pool,
        });
        Ok(())
    }

    /// Check every receive queue has been bound
    pub fn start(&self) -> CommonResult<()> {
        for (q, slot) in self.rx_queues.iter().enumerate() {
            if slot.is_none() {
                return Err(CommonError::QueueSetup {
                    queue: q as u16,
                    reason: "not configured".into(),
                });
            }
        }
        tracing::info!(
            port = %self.name,
            rx_queues = self.rx_queues.len(),
            tx_queues = self.nb_tx,
            "loopback port started"
        );
        Ok(())
    }

    /// Join two ports back to back
    pub fn connect(a: &Arc<LoopbackPort>, b: &Arc<LoopbackPort>) {
        let _ = a.peer.set(Arc::downgrade(b));
        let _ = b.peer.set(Arc::downgrade(a));
    }

    /// Enable or disable transmit (link down)
    pub fn set_tx_enabled(&self, enabled: bool) {
        self.tx_enabled.store(enabled, Ordering::Release);
    }

    /// Frames dropped on receive (ring full or pool empty)
    pub fn rx_missed(&self) -> u64 {
        self.rx_missed.load(Ordering::Relaxed)
    }

    /// Frames transmitted
    pub fn tx_packets(&self) -> u64 {
        self.tx_packets.load(Ordering::Relaxed)
    }

    /// Receive a frame from the wire
    pub fn deliver(&self, frame: &[u8], stamp: HwStamp) -> bool {
        let Some(queue) = self.steering.select(frame) else {
            self.rx_missed.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let Some(Some(rx)) = self.rx_queues.get(queue as usize) else {
            self.rx_missed.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let Some(mut buf) = rx.pool.alloc() else {
            self.rx_missed.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        buf.fill_from(frame);
        let ticks = monotonic_ns() / HW_TICK_NS;
        match stamp {
            HwStamp::Tx => telemetry::field::set_hw_tx(buf.data_mut(), ticks),
            HwStamp::Rx => telemetry::field::set_hw_rx(buf.data_mut(), ticks),
            HwStamp::None => {}
        }
        if let Err(buf) = rx.ring.push(buf) {
            rx.pool.free(buf);
            self.rx_missed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}

impl NicPort for LoopbackPort {
    fn rx_burst(&self, queue: u16, out: &mut Vec<PacketBuffer>, max: usize) -> usize {
        let Some(Some(rx)) = self.rx_queues.get(queue as usize) else {
            return 0;
        };
        let mut n = 0;
        while n < max {
            match rx.ring.pop() {
                Some(buf) => {
                    out.push(buf);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn tx_burst(&self, queue: u16, pkts: &[PacketBuffer]) -> usize {
        if queue >= self.nb_tx || !self.tx_enabled.load(Ordering::Acquire) {
            return 0;
        }
        let accepted = pkts.len().min(BURST_SIZE);
        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            for pkt in &pkts[..accepted] {
                peer.deliver(pkt.data(), self.hw_stamp);
            }
        }
        self.tx_packets.fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    fn rx_queue_count(&self, queue: u16) -> usize {
        match self.rx_queues.get(queue as usize) {
            Some(Some(rx)) => rx.ring.len(),
            _ => 0,
        }
    }

    fn socket_id(&self) -> Option<usize> {
        self.socket_id
    }
}
