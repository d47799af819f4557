//! In-memory fakes for the pipeline's external seams.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::context::JobContext;
use crate::exec::{CommandExecutor, Invocation, ProcessOutcome};
use crate::report::{ReportArtifact, ReportFormat};
use crate::result::{AcquisitionError, UploadError};
use crate::tool::Fetcher;
use crate::upload::{UploadReceipt, Uploader};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Cobertura document the fake tool writes
pub(crate) const COBERTURA: &str = r#"<?xml version="1.0"?>
<coverage line-rate="0.824" branch-rate="0" lines-covered="412" lines-valid="500" version="1.0" timestamp="0">
  <packages></packages>
</coverage>
"#;

/// Serves fixed bytes, or fails every fetch
#[derive(Debug)]
pub(crate) struct FakeFetcher {
    body: Option<Vec<u8>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn serving(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            body: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.body
            .clone()
            .ok_or_else(|| AcquisitionError::fetch(url, "connection refused"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Pass,
    Silent,
    Unspawnable,
}

/// Records invocations and behaves like the tools it stands in for
///
/// `cargo install --root R` creates `R/bin/<crate>`, and `--out F` writes a
/// well-formed report of format `F` into `--output-dir`.
#[derive(Debug)]
pub(crate) struct RecordingExecutor {
    behaviour: Behaviour,
    fail_on: Option<(String, i32)>,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingExecutor {
    fn with(behaviour: Behaviour, fail_on: Option<(String, i32)>) -> Self {
        Self {
            behaviour,
            fail_on,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn passing() -> Self {
        Self::with(Behaviour::Pass, None)
    }

    /// Exit with `code` whenever an argument equals `arg`
    pub(crate) fn failing_on(arg: &str, code: i32) -> Self {
        Self::with(Behaviour::Pass, Some((arg.to_string(), code)))
    }

    /// Exit zero without writing anything
    pub(crate) fn silent() -> Self {
        Self::with(Behaviour::Silent, None)
    }

    /// Fail to start every process
    pub(crate) fn unspawnable() -> Self {
        Self::with(Behaviour::Unspawnable, None)
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    fn simulate(invocation: &Invocation) -> std::io::Result<()> {
        if invocation.args.first().map(String::as_str) == Some("install") {
            if let (Some(name), Some(root)) =
                (invocation.args.get(1), invocation.arg_value("--root"))
            {
                let bin = Path::new(root).join("bin");
                std::fs::create_dir_all(&bin)?;
                write_executable(&bin.join(name), b"#!/bin/sh\nexit 0\n")?;
            }
            return Ok(());
        }

        if let Some(flag) = invocation.arg_value("--out") {
            let format: ReportFormat = flag
                .parse()
                .map_err(|e: String| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let dir = match (invocation.arg_value("--output-dir"), &invocation.current_dir) {
                (Some(dir), Some(cwd)) => cwd.join(dir),
                (Some(dir), None) => PathBuf::from(dir),
                (None, Some(cwd)) => cwd.clone(),
                (None, None) => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join(format.file_name()), sample_report(format))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, invocation: &Invocation) -> std::io::Result<ProcessOutcome> {
        self.calls.lock().unwrap().push(invocation.clone());

        if self.behaviour == Behaviour::Unspawnable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file or directory",
            ));
        }
        if let Some((arg, code)) = &self.fail_on {
            if invocation.has_arg(arg) {
                return Ok(ProcessOutcome::exited(*code, Duration::from_millis(1)));
            }
        }
        if self.behaviour == Behaviour::Pass {
            Self::simulate(invocation)?;
        }
        Ok(ProcessOutcome::exited(0, Duration::from_millis(1)))
    }
}

/// A report body that passes format validation
pub(crate) fn sample_report(format: ReportFormat) -> &'static str {
    match format {
        ReportFormat::Xml => COBERTURA,
        ReportFormat::Lcov => "SF:src/lib.rs\nDA:1,1\nDA:2,0\nend_of_record\n",
        ReportFormat::Json => r#"{"files":[]}"#,
        ReportFormat::Html => "<!DOCTYPE html><html><body>coverage</body></html>",
    }
}

/// An upload as the fake backend saw it
#[derive(Debug, Clone)]
pub(crate) struct ReceivedUpload {
    pub(crate) artifact: ReportArtifact,
    pub(crate) job_id: String,
    pub(crate) provider: String,
    pub(crate) file_present: bool,
}

#[derive(Debug, Clone, Copy)]
enum Answer {
    Accept,
    Reject(u16),
    Unreachable,
}

/// Records uploads and answers with a fixed outcome
#[derive(Debug)]
pub(crate) struct FakeUploader {
    answer: Answer,
    received: Mutex<Vec<ReceivedUpload>>,
}

impl FakeUploader {
    fn answering(answer: Answer) -> Self {
        Self {
            answer,
            received: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn accepting() -> Self {
        Self::answering(Answer::Accept)
    }

    pub(crate) fn rejecting(status: u16) -> Self {
        Self::answering(Answer::Reject(status))
    }

    pub(crate) fn unreachable() -> Self {
        Self::answering(Answer::Unreachable)
    }

    pub(crate) fn uploads(&self) -> Vec<ReceivedUpload> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        artifact: &ReportArtifact,
        context: &JobContext,
    ) -> Result<UploadReceipt, UploadError> {
        self.received.lock().unwrap().push(ReceivedUpload {
            artifact: artifact.clone(),
            job_id: context.job_id().to_string(),
            provider: context.provider().to_string(),
            file_present: artifact.path.is_file(),
        });
        match self.answer {
            Answer::Accept => Ok(UploadReceipt {
                status: 200,
                message: "accepted".to_string(),
            }),
            Answer::Reject(status) => Err(UploadError::Rejected {
                status,
                body: "invalid token".to_string(),
            }),
            Answer::Unreachable => Err(UploadError::Network {
                endpoint: "http://127.0.0.1:9/upload".to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

pub(crate) fn write_executable(path: &Path, content: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
