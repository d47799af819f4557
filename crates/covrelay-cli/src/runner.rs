//! Wires the CLI to the pipeline

use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use covrelay::{CovConfig, JobContext, Orchestrator, RunSummary};
use std::sync::Arc;

/// Build the job context from the environment and run (or plan) the pipeline
pub async fn run(settings: &CliConfig, config: CovConfig) -> CliResult<()> {
    let context = JobContext::from_env(&config.context)?;
    let reporter = Arc::new(ProgressReporter::new(
        settings.color.should_color(),
        settings.verbosity.is_quiet(),
    ));
    let orchestrator = Orchestrator::new(config)?.with_observer(reporter.clone());

    if settings.dry_run {
        println!("{}", orchestrator.plan(&context));
        return Ok(());
    }

    reporter.header(&format!(
        "covrelay: job {} ({})",
        context.job_id(),
        context.provider()
    ));

    match orchestrator.run(&context).await {
        Ok(summary) => {
            reporter.run_summary(&summary);
            if settings.verbosity.is_verbose() {
                if let Some(artifact) = &summary.artifact {
                    reporter.info(&format!(
                        "Report {} ({} bytes, sha256 {})",
                        artifact.path.display(),
                        artifact.size,
                        artifact.sha256
                    ));
                }
            }
            write_summary(settings, &summary)
        }
        Err(failure) => {
            if let Some(artifact) = &failure.summary.artifact {
                reporter.info(&format!("Report kept at {}", artifact.path.display()));
            }
            write_summary(settings, &failure.summary)?;
            Err(failure.into())
        }
    }
}

fn write_summary(settings: &CliConfig, summary: &RunSummary) -> CliResult<()> {
    let Some(path) = &settings.summary_path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    tracing::debug!(path = %path.display(), "run summary written");
    Ok(())
}
