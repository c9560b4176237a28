//! Error types shared by both sides of the testbed

use thiserror::Error;

/// Common error type
#[derive(Error, Debug)]
pub enum CommonError {
    /// Pool cannot back its ring
    #[error("pool {pool} sizing invalid: {count} buffers cannot back a ring of {ring_size}")]
    PoolSizing {
        pool: String,
        count: usize,
        ring_size: usize,
    },

    /// Queue id outside the configured range
    #[error("invalid queue {0}")]
    InvalidQueue(u16),

    /// Queue configured twice or with bad parameters
    #[error("queue setup failed for queue {queue}: {reason}")]
    QueueSetup { queue: u16, reason: String },

    /// Bulk allocation could not be satisfied
    #[error("pool {0} exhausted")]
    PoolExhausted(String),

    /// Thread could not be pinned
    #[error("failed to pin thread to core {0}")]
    Affinity(usize),

    /// Clock calibration produced nonsense
    #[error("clock calibration failed: {0}")]
    Calibration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for common operations
pub type CommonResult<T> = Result<T, CommonError>;
