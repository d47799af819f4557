//! The four-step coverage run.

use super::state::PipelineState;
use crate::config::{CovConfig, PassMode};
use crate::context::JobContext;
use crate::exec::{CommandExecutor, Invocation, ProcessExecutor};
use crate::report::{self, ReportArtifact, ReportFormat};
use crate::result::{
    AcquisitionError, ConfigError, CovResult, ExecutionError, PipelineError, Step, UploadError,
};
use crate::tool::{Fetcher, HttpFetcher, Platform, ToolHandle, ToolInstaller};
use crate::upload::{HttpUploader, UploadReceipt, Uploader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Receives progress callbacks while a run is in flight
pub trait RunObserver: Send + Sync + fmt::Debug {
    /// A step is about to start
    fn step_started(&self, _step: Step) {}

    /// The run moved from one state to the next
    fn transitioned(&self, _from: &PipelineState, _to: &PipelineState) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Record of one run, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run stopped
    pub finished_at: Option<DateTime<Utc>>,
    /// Every state visited, starting with `Init`
    pub states: Vec<PipelineState>,
    /// Resolved tool, once acquired
    pub tool: Option<ToolHandle>,
    /// Validated report, once generated
    pub artifact: Option<ReportArtifact>,
    /// Backend answer, once uploaded
    pub receipt: Option<UploadReceipt>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            states: vec![PipelineState::Init],
            tool: None,
            artifact: None,
            receipt: None,
        }
    }

    /// The last state reached
    #[must_use]
    pub fn final_state(&self) -> Option<&PipelineState> {
        self.states.last()
    }

    /// Whether the run reached `Done`
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.final_state() == Some(&PipelineState::Done)
    }

    /// Wall-clock duration, once finished
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

/// A failed run: the error plus everything recorded up to it
#[derive(Debug)]
pub struct RunFailure {
    /// What went wrong
    pub error: PipelineError,
    /// Path taken before the failure
    pub summary: RunSummary,
}

impl RunFailure {
    /// Process exit code for this failure
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// What a run would do, without doing it
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Tool that would be used
    pub tool: ToolHandle,
    /// Tool invocations in order
    pub invocations: Vec<Invocation>,
    /// Report location
    pub report_path: PathBuf,
    /// Upload target
    pub endpoint: String,
}

impl fmt::Display for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "tool:   {} {} ({:?}) at {}",
            self.tool.name,
            self.tool.version,
            self.tool.origin,
            self.tool.path.display()
        )?;
        for invocation in &self.invocations {
            writeln!(f, "run:    {invocation}")?;
        }
        writeln!(f, "report: {}", self.report_path.display())?;
        write!(f, "upload: {}", self.endpoint)
    }
}

/// Runs acquire, execute, report and upload in order, stopping at the
/// first failure
#[derive(Debug)]
pub struct Orchestrator {
    config: CovConfig,
    installer: ToolInstaller,
    executor: Arc<dyn CommandExecutor>,
    uploader: Arc<dyn Uploader>,
    observer: Arc<dyn RunObserver>,
}

impl Orchestrator {
    /// Create an orchestrator talking to the real network and processes
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP clients cannot be built
    pub fn new(config: CovConfig) -> CovResult<Self> {
        let timeout = Duration::from_secs(config.upload.timeout_secs);
        let fetcher = HttpFetcher::new(timeout).map_err(PipelineError::Acquire)?;
        let uploader = HttpUploader::new(&config.upload)
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        Ok(Self::with_parts(
            config,
            Arc::new(fetcher),
            Arc::new(ProcessExecutor),
            Arc::new(uploader),
        ))
    }

    /// Create an orchestrator from explicit seams
    #[must_use]
    pub fn with_parts(
        config: CovConfig,
        fetcher: Arc<dyn Fetcher>,
        executor: Arc<dyn CommandExecutor>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let installer = ToolInstaller::new(config.tool.clone(), fetcher, executor.clone());
        Self {
            config,
            installer,
            executor,
            uploader,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the platform used for download checks
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.installer = self.installer.with_platform(platform);
        self
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &CovConfig {
        &self.config
    }

    /// Report directory as seen from this process
    fn report_dir(&self) -> PathBuf {
        let dir = &self.config.report.output_dir;
        match &self.config.tool.working_dir {
            Some(cwd) => cwd.join(dir),
            None => dir.clone(),
        }
    }

    fn base_invocation(&self, tool: &ToolHandle) -> Invocation {
        let invocation = tool.invocation();
        match &self.config.tool.working_dir {
            Some(dir) => invocation.current_dir(dir),
            None => invocation,
        }
    }

    fn with_report_flags(&self, invocation: Invocation, format: ReportFormat) -> Invocation {
        invocation.args([
            "--out".to_string(),
            format.tool_flag().to_string(),
            "--output-dir".to_string(),
            self.config.report.output_dir.display().to_string(),
        ])
    }

    /// The instrumented test run, carrying job identity and credentials
    #[must_use]
    pub fn test_invocation(&self, tool: &ToolHandle, context: &JobContext) -> Invocation {
        let mut invocation = self.base_invocation(tool).args([
            "--ciserver",
            context.provider(),
            "--coveralls",
            context.job_id(),
        ]);
        if self.config.passes == PassMode::SinglePass {
            invocation = self.with_report_flags(invocation, self.config.report.format);
        }
        for (name, value) in context.credentials() {
            invocation = invocation.env(name.clone(), value.clone());
        }
        invocation.args(self.config.tool.args.iter().cloned())
    }

    /// The report-emitting run of the two-pass mode
    #[must_use]
    pub fn report_invocation(&self, tool: &ToolHandle, format: ReportFormat) -> Invocation {
        self.with_report_flags(self.base_invocation(tool), format)
            .args(self.config.tool.args.iter().cloned())
    }

    /// Resolve and install the coverage tool
    ///
    /// # Errors
    ///
    /// Returns error on fetch failure, checksum mismatch, unsupported
    /// platform, or a missing executable
    pub async fn acquire_tool(&self) -> Result<ToolHandle, AcquisitionError> {
        self.installer.acquire().await
    }

    /// Run the test suite under instrumentation
    ///
    /// # Errors
    ///
    /// Returns error if the tool cannot start or exits non-zero
    pub async fn run_instrumented_tests(
        &self,
        tool: &ToolHandle,
        context: &JobContext,
    ) -> Result<(), ExecutionError> {
        if self.config.passes == PassMode::SinglePass {
            let _ = report::prepare_target(&self.report_dir(), self.config.report.format)?;
        }
        self.execute(&self.test_invocation(tool, context)).await
    }

    /// Emit the report in `format` and validate it
    ///
    /// In single-pass mode the test run already wrote the report, so only
    /// validation happens here.
    ///
    /// # Errors
    ///
    /// Returns error if the tool fails or leaves no valid report
    pub async fn generate_report(
        &self,
        tool: &ToolHandle,
        format: ReportFormat,
    ) -> Result<ReportArtifact, ExecutionError> {
        let dir = self.report_dir();
        let path = match self.config.passes {
            PassMode::TwoPass => {
                let path = report::prepare_target(&dir, format)?;
                self.execute(&self.report_invocation(tool, format)).await?;
                path
            }
            PassMode::SinglePass => report::report_path(&dir, format),
        };

        let artifact = report::collect(&path, format)?;
        tracing::info!(
            path = %artifact.path.display(),
            size = artifact.size,
            sha256 = %artifact.sha256,
            coverage = ?artifact.summary.map(|s| s.percent()),
            "coverage report ready"
        );
        Ok(artifact)
    }

    /// Send the report to the aggregation backend
    ///
    /// # Errors
    ///
    /// Returns error on network failure or rejection
    pub async fn upload_report(
        &self,
        artifact: &ReportArtifact,
        context: &JobContext,
    ) -> Result<UploadReceipt, UploadError> {
        self.uploader.upload(artifact, context).await
    }

    async fn execute(&self, invocation: &Invocation) -> Result<(), ExecutionError> {
        tracing::info!(command = %invocation, "running coverage tool");
        let outcome = self
            .executor
            .execute(invocation)
            .await
            .map_err(|source| ExecutionError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })?;
        if !outcome.success() {
            return Err(ExecutionError::ToolFailed {
                status: outcome.describe(),
                code: outcome.code,
            });
        }
        Ok(())
    }

    /// Describe the run without executing anything
    #[must_use]
    pub fn plan(&self, context: &JobContext) -> RunPlan {
        let tool = self.installer.planned();
        let format = self.config.report.format;
        let mut invocations = vec![self.test_invocation(&tool, context)];
        if self.config.passes == PassMode::TwoPass {
            invocations.push(self.report_invocation(&tool, format));
        }
        RunPlan {
            invocations,
            report_path: report::report_path(&self.report_dir(), format),
            endpoint: self.config.upload.endpoint.clone(),
            tool,
        }
    }

    /// Run the whole pipeline for `context`
    ///
    /// # Errors
    ///
    /// Returns the first step failure together with the states visited
    pub async fn run(&self, context: &JobContext) -> Result<RunSummary, RunFailure> {
        let mut summary = RunSummary::new();
        tracing::info!(
            run_id = %summary.run_id,
            provider = context.provider(),
            job = context.job_id(),
            passes = ?self.config.passes,
            "starting coverage run"
        );

        let outcome = self.drive(context, &mut summary).await;
        summary.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => Ok(summary),
            Err(error) => Err(RunFailure { error, summary }),
        }
    }

    async fn drive(&self, context: &JobContext, summary: &mut RunSummary) -> CovResult<()> {
        self.observer.step_started(Step::Acquire);
        let tool = self.acquire_tool().await.map_err(PipelineError::Acquire);
        let tool = self.settle(summary, tool)?;
        summary.tool = Some(tool.clone());

        self.observer.step_started(Step::Execute);
        let executed = self
            .run_instrumented_tests(&tool, context)
            .await
            .map_err(PipelineError::Execute);
        self.settle(summary, executed)?;

        self.observer.step_started(Step::Report);
        let artifact = self
            .generate_report(&tool, self.config.report.format)
            .await
            .map_err(PipelineError::Report);
        let artifact = self.settle(summary, artifact)?;
        summary.artifact = Some(artifact.clone());

        self.observer.step_started(Step::Upload);
        let receipt = self
            .upload_report(&artifact, context)
            .await
            .map_err(PipelineError::Upload);
        let receipt = self.settle(summary, receipt)?;
        summary.receipt = Some(receipt);

        self.settle(summary, Ok(()))
    }

    /// Record the outcome of the current step as a state transition
    fn settle<T>(&self, summary: &mut RunSummary, result: CovResult<T>) -> CovResult<T> {
        let current = summary
            .final_state()
            .cloned()
            .unwrap_or(PipelineState::Init);
        match result {
            Ok(value) => {
                let next = current.advance()?;
                self.enter(summary, &current, next);
                Ok(value)
            }
            Err(error) => {
                match current.fail(error.to_string()) {
                    Ok(next) => self.enter(summary, &current, next),
                    Err(e) => tracing::error!(error = %e, "failure outside a step"),
                }
                Err(error)
            }
        }
    }

    fn enter(&self, summary: &mut RunSummary, from: &PipelineState, to: PipelineState) {
        match &to {
            PipelineState::Failed { step, cause } => {
                tracing::error!(run_id = %summary.run_id, %step, %cause, "pipeline failed");
            }
            _ => tracing::info!(run_id = %summary.run_id, %from, %to, "pipeline transition"),
        }
        self.observer.transitioned(from, &to);
        summary.states.push(to);
    }
}
