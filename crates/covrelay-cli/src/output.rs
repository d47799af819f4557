//! Step output and progress reporting

use console::{style, Style, Term};
use covrelay::{PipelineState, RunObserver, RunSummary, Step};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Success,
    Failure,
    Warning,
    Info,
}

fn step_label(step: Step) -> &'static str {
    match step {
        Step::Acquire => "Acquire coverage tool",
        Step::Execute => "Run instrumented tests",
        Step::Report => "Generate coverage report",
        Step::Upload => "Upload coverage report",
    }
}

/// Progress reporter for a coverage run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Mutex<Option<ProgressBar>>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            spinner: Mutex::new(None),
            use_color,
            quiet,
        }
    }

    fn prefixed(&self, marker: Marker, message: &str) -> String {
        let prefix = match (marker, self.use_color) {
            (Marker::Success, true) => style("✓").green().bold().to_string(),
            (Marker::Failure, true) => style("✗").red().bold().to_string(),
            (Marker::Warning, true) => style("⚠").yellow().bold().to_string(),
            (Marker::Info, true) => style("ℹ").blue().bold().to_string(),
            (Marker::Success, false) => "PASS".to_string(),
            (Marker::Failure, false) => "FAIL".to_string(),
            (Marker::Warning, false) => "WARN".to_string(),
            (Marker::Info, false) => "INFO".to_string(),
        };
        format!("{prefix} {message}")
    }

    fn write(&self, marker: Marker, message: &str) {
        // Failures print even in quiet mode
        if self.quiet && marker != Marker::Failure {
            return;
        }
        self.clear_spinner();
        let _ = self.term.write_line(&self.prefixed(marker, message));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        self.write(Marker::Success, message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        self.write(Marker::Failure, message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.write(Marker::Warning, message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        self.write(Marker::Info, message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        let _ = self.term.write_line("");
        let _ = self.term.write_line(&styled);
    }

    /// Start a spinner for a step that produces no output of its own
    fn start_spinner(&self, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.spinner.lock() {
            *slot = Some(pb);
        }
    }

    fn clear_spinner(&self) {
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }

    /// Print the closing summary of a successful run
    pub fn run_summary(&self, summary: &RunSummary) {
        if self.quiet {
            return;
        }

        let _ = self.term.write_line("");
        let elapsed = summary.elapsed().unwrap_or_default().as_secs_f64();
        let coverage = summary
            .artifact
            .as_ref()
            .and_then(|a| a.summary)
            .map_or_else(|| "n/a".to_string(), |s| s.to_string());

        let line = format!("coverage {coverage} uploaded in {elapsed:.2}s");
        if self.use_color {
            let passed = Style::new().green().bold();
            let _ = self
                .term
                .write_line(&format!("{} {line}", passed.apply_to("PASSED")));
        } else {
            let _ = self.term.write_line(&format!("PASSED {line}"));
        }
    }
}

impl RunObserver for ProgressReporter {
    fn step_started(&self, step: Step) {
        // Tool output streams to the terminal during execute and report
        if matches!(step, Step::Acquire | Step::Upload) {
            self.start_spinner(&format!("{}...", step_label(step)));
        } else {
            self.info(step_label(step));
        }
    }

    fn transitioned(&self, from: &PipelineState, to: &PipelineState) {
        match (from.next_step(), to) {
            (_, PipelineState::Failed { step, cause }) => {
                self.failure(&format!("{}: {cause}", step_label(*step)));
            }
            (Some(step), _) => self.success(step_label(step)),
            (None, _) => self.clear_spinner(),
        }
    }
}
