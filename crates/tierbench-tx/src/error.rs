//! Transmit-side errors

use std::path::PathBuf;
use thiserror::Error;
use tierbench_common::CommonError;

/// Transmit engine error
#[derive(Error, Debug)]
pub enum TxError {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Packet size outside the Ethernet frame range
    #[error("packet size {size} outside [{min}, {max}]")]
    PacketSize { size: usize, min: usize, max: usize },

    /// Burst schedule could not be parsed
    #[error("burst schedule {source_name} line {line}: {reason}")]
    Schedule {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// Burst schedule file could not be read
    #[error("burst schedule {path}: {source}")]
    ScheduleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rate register could not be mapped or written
    #[error("rate register: {0}")]
    Register(String),

    /// Register access outside the mapped window
    #[error("register offset {offset:#x} outside mapped window [{base:#x}, {end:#x})")]
    RegisterOffset { offset: u64, base: u64, end: u64 },

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

/// Result type for transmit-side operations
pub type TxResult<T> = Result<T, TxError>;
