//! covrelay: coverage reporting orchestrator for CI
//!
//! Acquires a pinned coverage tool, runs the test suite under it, collects
//! the report it writes, and uploads that report to an aggregation backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      COVRELAY Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  JobContext ──► Orchestrator                                     │
//! │                   │                                              │
//! │   ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐  │
//! │   │ acquire   │──►│ execute   │──►│ report    │──►│ upload    │  │
//! │   │ (Fetcher) │   │ (Executor)│   │ (Executor)│   │ (Uploader)│  │
//! │   └───────────┘   └───────────┘   └───────────┘   └───────────┘  │
//! │   Init ► Acquired ► Executed ► Reported ► Uploaded ► Done        │
//! │                      any failure ► Failed { step, cause }        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use covrelay::{CovConfig, JobContext, Orchestrator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CovConfig::discover(None, std::path::Path::new("."))?;
//! let context = JobContext::from_env(&config.context)?;
//! let summary = Orchestrator::new(config)?.run(&context).await?;
//! println!("uploaded {:?}", summary.artifact);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod config;
pub mod context;
pub mod exec;
pub mod pipeline;
pub mod report;
mod result;
pub mod telemetry;
pub mod tool;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use config::{
    ArchiveKind, ContextConfig, CovConfig, PassMode, ReportConfig, ToolConfig, ToolSource,
    UploadConfig, DEFAULT_CONFIG_FILE, DEFAULT_ENDPOINT, DEFAULT_TOOL_NAME, DEFAULT_TOOL_VERSION,
};
pub use context::{JobContext, Secret, DEFAULT_PROVIDER};
pub use exec::{CommandExecutor, Invocation, ProcessExecutor, ProcessOutcome};
pub use pipeline::{
    InvalidTransition, NoopObserver, Orchestrator, PipelineState, RunFailure, RunObserver,
    RunPlan, RunSummary,
};
pub use report::{CoverageSummary, ReportArtifact, ReportFormat};
pub use result::{
    AcquisitionError, ConfigError, CovResult, ExecutionError, PipelineError, Step, UploadError,
};
pub use telemetry::{init_tracing, LogFormat};
pub use tool::{Fetcher, HttpFetcher, Platform, ToolHandle, ToolInstaller, ToolOrigin};
pub use upload::{HttpUploader, UploadReceipt, Uploader};
