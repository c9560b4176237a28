//! Tier Pools
//!
//! One buffer pool per configured tier. The primary pool is built on the
//! calling thread; every secondary pool is built by its own initializer
//! thread pinned to a core of the pool's NUMA node so first-touch lands the
//! memory there. Pollers must not start before every pool exists, which the
//! [`StartupBarrier`] enforces.

use crate::config::RxConfig;
use crate::error::{RxError, RxResult};
use crate::tier::{QueueLayout, Tier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tierbench_common::{affinity, BufferPool, PacketBuffer};

/// Counts initializers that have finished
#[derive(Debug)]
pub struct StartupBarrier {
    ready: AtomicUsize,
    expected: usize,
}

impl StartupBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            ready: AtomicUsize::new(0),
            expected,
        }
    }

    /// Report one initializer done
    pub fn arrive(&self) {
        self.ready.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_complete(&self) -> bool {
        self.ready.load(Ordering::Acquire) >= self.expected
    }

    /// Spin until every initializer has arrived
    pub fn wait(&self) {
        while !self.is_complete() {
            std::hint::spin_loop();
            thread::yield_now();
        }
    }
}

/// Buffer pools indexed by tier
pub struct TierPools {
    pools: Vec<Arc<BufferPool>>,
}

impl TierPools {
    pub fn from_pools(pools: Vec<Arc<BufferPool>>) -> Self {
        Self { pools }
    }

    pub fn get(&self, tier: Tier) -> Option<&Arc<BufferPool>> {
        self.pools.get(tier.index() as usize)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BufferPool>> {
        self.pools.iter()
    }

    /// Return a buffer to the pool it came from
    #[inline]
    pub fn release(&self, buf: PacketBuffer) {
        match self.pools.get(buf.pool_id() as usize) {
            Some(pool) => pool.free(buf),
            None => tracing::warn!(pool_id = buf.pool_id(), "buffer from unknown pool dropped"),
        }
    }

    pub fn release_all(&self, bufs: impl IntoIterator<Item = PacketBuffer>) {
        for buf in bufs {
            self.release(buf);
        }
    }
}

struct PoolPlan {
    tier: Tier,
    name: String,
    node: usize,
    size: usize,
    ring_size: usize,
}

/// Build every tier pool, waiting for the secondary initializers
pub fn init_tier_pools(cfg: &RxConfig, numa_nodes: usize) -> RxResult<TierPools> {
    let layout = QueueLayout::new(cfg.rx_cores, cfg.tier_mode);
    let nodes = cfg.tier_mode.secondary_nodes(numa_nodes);

    let primary = BufferPool::for_ring(
        "rx-primary",
        Tier::Primary.index(),
        cfg.primary_pool_size,
        cfg.buffer_size,
        cfg.primary_ring_size,
    )
    .map_err(|e| RxError::TierInit {
        tier: Tier::Primary.index(),
        reason: e.to_string(),
    })?
    .with_socket(0);
    tracing::info!(pool = primary.name(), size = primary.size(), node = 0, "pool created");

    let plans: Vec<PoolPlan> = layout
        .secondary_tiers()
        .zip(nodes)
        .map(|(tier, node)| PoolPlan {
            tier,
            name: format!("rx-{tier}"),
            node,
            size: cfg.secondary_pool_size,
            ring_size: cfg.secondary_ring_size,
        })
        .collect();

    let barrier = Arc::new(StartupBarrier::new(plans.len()));
    let cores_per_node = (affinity::available_cores() / numa_nodes.max(1)).max(1);
    let buffer_size = cfg.buffer_size;

    let mut handles = Vec::with_capacity(plans.len());
    for plan in plans {
        let barrier = barrier.clone();
        let tier = plan.tier;
        let handle = thread::Builder::new()
            .name(format!("pool-init-{}", plan.node))
            .spawn(move || {
                affinity::pin_or_warn(cores_per_node * plan.node, "pool-init");
                let pool = BufferPool::for_ring(
                    plan.name,
                    plan.tier.index(),
                    plan.size,
                    buffer_size,
                    plan.ring_size,
                )
                .map(|p| p.with_socket(plan.node));
                barrier.arrive();
                pool
            })
            .map_err(|e| RxError::SpawnFailed(format!("pool initializer: {e}")))?;
        handles.push((tier, handle));
    }

    barrier.wait();

    let mut pools = vec![Arc::new(primary)];
    for (tier, handle) in handles {
        let pool = handle
            .join()
            .map_err(|_| RxError::TierInit {
                tier: tier.index(),
                reason: "initializer panicked".into(),
            })?
            .map_err(|e| RxError::TierInit {
                tier: tier.index(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            pool = pool.name(),
            size = pool.size(),
            node = ?pool.socket_id(),
            "pool created"
        );
        pools.push(Arc::new(pool));
    }
    Ok(TierPools::from_pools(pools))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierMode;

    fn small(mode: TierMode) -> RxConfig {
        RxConfig {
            tier_mode: mode,
            primary_ring_size: 64,
            primary_pool_size: 128,
            secondary_ring_size: 32,
            secondary_pool_size: 64,
            buffer_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn test_barrier() {
        let b = Arc::new(StartupBarrier::new(3));
        assert!(!b.is_complete());
        let hs: Vec<_> = (0..3)
            .map(|_| {
                let b = b.clone();
                thread::spawn(move || b.arrive())
            })
            .collect();
        b.wait();
        assert!(b.is_complete());
        for h in hs {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_numa_pools_one_per_tier() {
        let pools = init_tier_pools(&small(TierMode::Numa), 4).unwrap();
        assert_eq!(pools.len(), 4);
        for (i, p) in pools.iter().enumerate() {
            assert_eq!(p.pool_id() as usize, i);
        }
        assert_eq!(pools.get(Tier::Secondary3).unwrap().socket_id(), Some(3));
    }

    #[test]
    fn test_cxl_pool_on_last_node() {
        let pools = init_tier_pools(&small(TierMode::Cxl), 5).unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools.get(Tier::Secondary1).unwrap().socket_id(), Some(4));
    }

    #[test]
    fn test_undersized_secondary_is_fatal() {
        let cfg = RxConfig {
            secondary_pool_size: 40,
            ..small(TierMode::Cxl)
        };
        assert!(matches!(
            init_tier_pools(&cfg, 2),
            Err(RxError::TierInit { tier: 1, .. })
        ));
    }

    #[test]
    fn test_release_routes_by_pool_id() {
        let pools = init_tier_pools(&small(TierMode::Cxl), 2).unwrap();
        let sec = pools.get(Tier::Secondary1).unwrap().clone();
        let buf = sec.alloc().unwrap();
        assert_eq!(sec.allocated(), 1);
        pools.release(buf);
        assert_eq!(sec.allocated(), 0);
    }
}
