//! Receive-side errors

use thiserror::Error;
use tierbench_common::CommonError;

/// Receive pipeline error
#[derive(Error, Debug)]
pub enum RxError {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// A tier's pool or queue could not be brought up
    #[error("tier {tier} initialisation failed: {reason}")]
    TierInit { tier: u8, reason: String },

    /// The machine does not have the NUMA layout the tier mode needs
    #[error("tier mode {mode} needs {needed} NUMA nodes, found {found}")]
    NumaLayout {
        mode: String,
        needed: usize,
        found: usize,
    },

    /// Worker thread could not be spawned
    #[error("failed to spawn {0}")]
    SpawnFailed(String),

    /// Engine started twice
    #[error("engine already running")]
    AlreadyRunning,

    /// Shared layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file (de)serialisation
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for receive-side operations
pub type RxResult<T> = Result<T, RxError>;
