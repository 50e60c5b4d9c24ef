//! Top-level error type for the launcher.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that stop the harness before or after a session runs.
///
/// Test failures are not errors: they are reported in the session summary
/// and reflected in the exit status.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write report '{path}': {source}")]
    Report {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("test engine stopped unexpectedly: {0}")]
    Engine(String),
}

impl HarnessError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Report { .. } | Self::Serialize(_) | Self::Engine(_) => 1,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
