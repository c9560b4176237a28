//! Memory Tiers
//!
//! A tier is one memory domain packets can be received into: local DRAM
//! (primary) or a remote NUMA / CXL node (secondary). Each tier owns its own
//! buffer pool and its own set of NIC receive queues.
//!
//! Queue layout with `N` receive cores:
//!
//! ```text
//! core i:  primary queue  i
//!          secondary k    i + k*N      (k = 1..=3)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tierbench_common::Steering;

/// Highest number of secondary tiers
pub const MAX_SECONDARY_TIERS: usize = 3;

/// Which secondary tiers exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierMode {
    /// Primary tier only
    #[default]
    None,
    /// One secondary tier on the CXL node (always the last NUMA node)
    Cxl,
    /// Three secondary tiers on NUMA nodes 1-3
    Numa,
}

impl TierMode {
    /// Number of secondary tiers this mode configures
    pub fn secondary_count(self) -> usize {
        match self {
            TierMode::None => 0,
            TierMode::Cxl => 1,
            TierMode::Numa => MAX_SECONDARY_TIERS,
        }
    }

    /// NUMA nodes backing each secondary tier, in tier order
    pub fn secondary_nodes(self, numa_nodes: usize) -> Vec<usize> {
        match self {
            TierMode::None => Vec::new(),
            TierMode::Cxl => vec![numa_nodes.saturating_sub(1)],
            TierMode::Numa => vec![1, 2, 3],
        }
    }

    /// NUMA nodes the machine must expose
    pub fn required_numa_nodes(self) -> usize {
        match self {
            TierMode::None => 1,
            TierMode::Cxl => 2,
            TierMode::Numa => 4,
        }
    }
}

impl fmt::Display for TierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierMode::None => write!(f, "none"),
            TierMode::Cxl => write!(f, "cxl"),
            TierMode::Numa => write!(f, "numa"),
        }
    }
}

/// One memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Primary,
    Secondary1,
    Secondary2,
    Secondary3,
}

impl Tier {
    /// All tiers in index order
    pub const ALL: [Tier; 4] = [
        Tier::Primary,
        Tier::Secondary1,
        Tier::Secondary2,
        Tier::Secondary3,
    ];

    /// Tier index; doubles as the buffer pool id
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(idx: u8) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    pub fn is_primary(self) -> bool {
        self == Tier::Primary
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Secondary1 => write!(f, "secondary-1"),
            Tier::Secondary2 => write!(f, "secondary-2"),
            Tier::Secondary3 => write!(f, "secondary-3"),
        }
    }
}

/// Maps (core, tier) pairs to NIC receive queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout {
    cores: u16,
    secondaries: u8,
}

impl QueueLayout {
    pub fn new(cores: u16, mode: TierMode) -> Self {
        Self {
            cores,
            secondaries: mode.secondary_count() as u8,
        }
    }

    pub fn cores(&self) -> u16 {
        self.cores
    }

    pub fn has_secondary(&self) -> bool {
        self.secondaries > 0
    }

    /// Configured tiers, primary first
    pub fn tiers(&self) -> impl Iterator<Item = Tier> {
        Tier::ALL.into_iter().take(1 + self.secondaries as usize)
    }

    /// Configured secondary tiers
    pub fn secondary_tiers(&self) -> impl Iterator<Item = Tier> {
        self.tiers().skip(1)
    }

    /// Receive queue of `tier` owned by `core`
    pub fn queue(&self, core: u16, tier: Tier) -> u16 {
        core + tier.index() as u16 * self.cores
    }

    pub fn primary_queue(&self, core: u16) -> u16 {
        self.queue(core, Tier::Primary)
    }

    /// Secondary queues owned by `core`, in tier order
    pub fn secondary_queues(&self, core: u16) -> Vec<(Tier, u16)> {
        self.secondary_tiers()
            .map(|t| (t, self.queue(core, t)))
            .collect()
    }

    /// Total receive queues on the port
    pub fn total_queues(&self) -> u16 {
        self.cores * (1 + self.secondaries as u16)
    }

    /// Tier a receive queue belongs to
    pub fn tier_of(&self, queue: u16) -> Option<Tier> {
        if self.cores == 0 || queue >= self.total_queues() {
            return None;
        }
        Tier::from_index((queue / self.cores) as u8)
    }

    /// Steering rules matching this layout
    pub fn steering(&self) -> Steering {
        Steering {
            primary: (0..self.cores).collect(),
            secondary: (self.cores..self.total_queues()).collect(),
        }
    }
}

/// Poller tier state
///
/// The poller stays on a state while it keeps receiving packets and flips
/// to the other one on the first empty poll. There is no hysteresis and no
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierState {
    /// Polling the primary tier
    #[default]
    Primary,
    /// Polling every secondary tier
    Secondary,
}

impl TierState {
    /// State for the next iteration after a poll returned `received` packets
    #[inline(always)]
    pub fn next(self, received: usize, has_secondary: bool) -> Self {
        if received != 0 || !has_secondary {
            return self;
        }
        match self {
            TierState::Primary => TierState::Secondary,
            TierState::Secondary => TierState::Primary,
        }
    }
}
