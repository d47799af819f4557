//! Result and error types for covrelay.
//!
//! Each pipeline step has its own error enum. [`PipelineError`] wraps them
//! with the step that failed and owns the exit-code mapping.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for covrelay operations
pub type CovResult<T> = Result<T, PipelineError>;

/// A step of the coverage pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Resolve and install the coverage tool
    Acquire,
    /// Run the test suite under instrumentation
    Execute,
    /// Emit the coverage report
    Report,
    /// Transmit the report to the aggregation backend
    Upload,
}

impl Step {
    /// All steps in pipeline order
    pub const ALL: [Self; 4] = [Self::Acquire, Self::Execute, Self::Report, Self::Upload];

    /// Stable lowercase name used in logs and messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Execute => "execute",
            Self::Report => "report",
            Self::Upload => "upload",
        }
    }

    /// Process exit code reported when this step fails
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Acquire => 3,
            Self::Execute => 4,
            Self::Report => 5,
            Self::Upload => 6,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while loading configuration or building the job context
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the schema
    #[error("failed to parse config {}: {message}", path.display())]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A value failed validation
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Error message
        message: String,
    },

    /// A required environment variable is absent or empty
    #[error("required environment variable {name} is not set")]
    MissingVariable {
        /// Variable name
        name: String,
    },
}

impl ConfigError {
    /// Create a validation error
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a missing-variable error
    #[must_use]
    pub fn missing_variable(name: impl Into<String>) -> Self {
        Self::MissingVariable { name: name.into() }
    }
}

/// Errors raised while resolving or installing the coverage tool
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Fetching the pinned artifact failed
    #[error("failed to fetch {url}: {message}")]
    Fetch {
        /// Source URL
        url: String,
        /// Error message (network failure or HTTP status)
        message: String,
    },

    /// The artifact digest does not match the pinned SHA-256
    #[error("checksum mismatch: expected sha256 {expected}, got {actual}")]
    ChecksumMismatch {
        /// Pinned digest
        expected: String,
        /// Digest of the bytes received
        actual: String,
    },

    /// Downloads are not published for this platform
    #[error("unsupported platform {os}-{arch} for downloaded tools")]
    UnsupportedPlatform {
        /// Operating system family
        os: String,
        /// CPU architecture
        arch: String,
    },

    /// The expected executable does not exist
    #[error("tool executable not found at {}", path.display())]
    NotFound {
        /// Expected location
        path: PathBuf,
    },

    /// The file exists but cannot be executed
    #[error("{} is not executable", path.display())]
    NotExecutable {
        /// Offending file
        path: PathBuf,
    },

    /// The release archive does not contain the tool
    #[error("archive does not contain {entry}: {message}")]
    Extract {
        /// Entry that was searched for
        entry: String,
        /// Error message
        message: String,
    },

    /// `cargo install` could not be run or exited non-zero
    #[error("cargo install failed: {message}")]
    Install {
        /// Error message
        message: String,
    },

    /// I/O error while staging the tool
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Create a fetch error
    #[must_use]
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an install error
    #[must_use]
    pub fn install(message: impl Into<String>) -> Self {
        Self::Install {
            message: message.into(),
        }
    }
}

/// Errors raised while running the coverage tool or collecting its report
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The tool process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that was launched
        program: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The tool (or the test suite it drives) failed
    #[error("coverage tool failed with {status}")]
    ToolFailed {
        /// Human description of the exit status
        status: String,
        /// Exit code when the process exited normally
        code: Option<i32>,
    },

    /// The tool exited zero but the report file is absent
    #[error("coverage report was not written to {}", path.display())]
    MissingReport {
        /// Expected report location
        path: PathBuf,
    },

    /// The report file exists but is not a usable report
    #[error("coverage report {} is invalid: {reason}", path.display())]
    InvalidReport {
        /// Report location
        path: PathBuf,
        /// Why the report was rejected
        reason: String,
    },

    /// I/O error around the report file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Create an invalid-report error
    #[must_use]
    pub fn invalid_report(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidReport {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while transmitting the report
#[derive(Debug, Error)]
pub enum UploadError {
    /// The endpoint could not be reached
    #[error("upload to {endpoint} failed: {message}")]
    Network {
        /// Endpoint URL
        endpoint: String,
        /// Error message
        message: String,
    },

    /// The backend answered with a non-success status
    #[error("upload rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The report could not be read back from disk
    #[error("failed to read report {}: {source}", path.display())]
    Read {
        /// Report location
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The report on disk no longer matches the one that was validated
    #[error("report {} changed after validation: expected sha256 {expected}, got {actual}", path.display())]
    ReportChanged {
        /// Report location
        path: PathBuf,
        /// Digest recorded by the report step
        expected: String,
        /// Digest of the bytes read for upload
        actual: String,
    },

    /// The configured endpoint is not usable
    #[error("invalid upload endpoint {endpoint}: {message}")]
    InvalidEndpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Error message
        message: String,
    },
}

/// A pipeline failure, tagged with the step that raised it
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration or job context could not be built
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tool acquisition failed
    #[error("acquire step failed: {0}")]
    Acquire(#[source] AcquisitionError),

    /// Instrumented test run failed
    #[error("execute step failed: {0}")]
    Execute(#[source] ExecutionError),

    /// Report generation failed
    #[error("report step failed: {0}")]
    Report(#[source] ExecutionError),

    /// Upload failed
    #[error("upload step failed: {0}")]
    Upload(#[source] UploadError),

    /// The pipeline attempted a transition its state machine forbids
    #[error("invalid pipeline transition: {0}")]
    InvalidTransition(String),
}

impl PipelineError {
    /// The step that failed, if the failure happened inside the pipeline
    #[must_use]
    pub const fn step(&self) -> Option<Step> {
        match self {
            Self::Acquire(_) => Some(Step::Acquire),
            Self::Execute(_) => Some(Step::Execute),
            Self::Report(_) => Some(Step::Report),
            Self::Upload(_) => Some(Step::Upload),
            Self::Config(_) | Self::InvalidTransition(_) => None,
        }
    }

    /// Process exit code for this failure
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match (self, self.step()) {
            (_, Some(step)) => step.exit_code(),
            (Self::Config(_), None) => 2,
            _ => 1,
        }
    }
}
