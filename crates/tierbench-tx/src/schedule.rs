//! Burst Schedule
//!
//! Cyclic list of `(duration_us, gap_us)` pairs. Never empty; the default is
//! one 100 us burst with no gap (steady state). Files hold one pair per
//! line, whitespace separated.

use crate::error::{TxError, TxResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Burst length used when nothing is configured
pub const DEFAULT_DURATION_US: u32 = 100;

/// One schedule step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstEntry {
    /// Time the burst should occupy
    pub duration_us: u32,
    /// Idle time after the burst
    pub gap_us: u32,
}

impl Default for BurstEntry {
    fn default() -> Self {
        Self {
            duration_us: DEFAULT_DURATION_US,
            gap_us: 0,
        }
    }
}

/// Non-empty cyclic schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BurstEntry>", into = "Vec<BurstEntry>")]
pub struct BurstSchedule {
    entries: Vec<BurstEntry>,
}

impl Default for BurstSchedule {
    fn default() -> Self {
        Self {
            entries: vec![BurstEntry::default()],
        }
    }
}

impl TryFrom<Vec<BurstEntry>> for BurstSchedule {
    type Error = TxError;

    fn try_from(entries: Vec<BurstEntry>) -> TxResult<Self> {
        Self::new(entries)
    }
}

impl From<BurstSchedule> for Vec<BurstEntry> {
    fn from(s: BurstSchedule) -> Self {
        s.entries
    }
}

impl BurstSchedule {
    pub fn new(entries: Vec<BurstEntry>) -> TxResult<Self> {
        if entries.is_empty() {
            return Err(TxError::Config("burst schedule is empty".into()));
        }
        if let Some(i) = entries.iter().position(|e| e.duration_us == 0) {
            return Err(TxError::Config(format!("burst {i} has zero duration")));
        }
        Ok(Self { entries })
    }

    /// Single entry from the command line; missing values take the defaults
    pub fn single(duration_us: Option<u32>, gap_us: Option<u32>) -> TxResult<Self> {
        Self::new(vec![BurstEntry {
            duration_us: duration_us.unwrap_or(DEFAULT_DURATION_US),
            gap_us: gap_us.unwrap_or(0),
        }])
    }

    /// Parse `duration gap` lines. Blank lines are skipped.
    pub fn parse(text: &str, source_name: &str) -> TxResult<Self> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let err = |reason: &str| TxError::Schedule {
                source_name: source_name.to_string(),
                line: i + 1,
                reason: reason.to_string(),
            };
            let mut fields = line.split_whitespace();
            let duration_us = fields
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .ok_or_else(|| err("expected <duration_us> <gap_us>"))?;
            let gap_us = fields
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .ok_or_else(|| err("expected <duration_us> <gap_us>"))?;
            if duration_us == 0 {
                return Err(err("duration must be positive"));
            }
            entries.push(BurstEntry {
                duration_us,
                gap_us,
            });
        }
        if entries.is_empty() {
            return Err(TxError::Schedule {
                source_name: source_name.to_string(),
                line: 0,
                reason: "no bursts".into(),
            });
        }
        Ok(Self { entries })
    }

    /// Read a schedule file
    pub fn from_file(path: impl AsRef<Path>) -> TxResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TxError::ScheduleFile {
            path: path.to_path_buf(),
            source,
        })?;
        let schedule = Self::parse(&text, &path.display().to_string())?;
        tracing::info!(path = %path.display(), bursts = schedule.len(), "burst schedule loaded");
        Ok(schedule)
    }

    pub fn entries(&self) -> &[BurstEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `idx`, wrapping around
    #[inline]
    pub fn get(&self, idx: usize) -> BurstEntry {
        self.entries[idx % self.entries.len()]
    }

    /// Index following `idx`
    #[inline]
    pub fn next_index(&self, idx: usize) -> usize {
        (idx + 1) % self.entries.len()
    }
}
