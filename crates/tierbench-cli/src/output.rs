//! Report output

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Structured log lines
    #[default]
    Text,
    /// Pretty JSON on stdout
    Json,
}

impl OutputFormat {
    pub fn print<T: Serialize>(&self, report: &T, log: impl FnOnce(&T)) {
        match self {
            OutputFormat::Text => log(report),
            OutputFormat::Json => match serde_json::to_string_pretty(report) {
                Ok(s) => println!("{s}"),
                Err(e) => tracing::warn!(error = %e, "report not serialisable"),
            },
        }
    }
}
