//! Error types for the CLI

use covrelay::{ConfigError, PipelineError, RunFailure};
use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration or job context error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pipeline could not be set up
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A pipeline step failed
    #[error(transparent)]
    Run(#[from] RunFailure),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run summary could not be encoded
    #[error("Failed to write run summary: {0}")]
    Summary(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Pipeline(e) => e.exit_code(),
            Self::Run(failure) => failure.exit_code(),
            Self::Io(_) | Self::Summary(_) => 1,
        }
    }
}
