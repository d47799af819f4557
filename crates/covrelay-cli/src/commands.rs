//! CLI argument definitions using clap

use crate::config::{CliConfig, ColorChoice, Verbosity};
use crate::error::CliResult;
use clap::{Parser, ValueEnum};
use covrelay::{CovConfig, LogFormat, PassMode, ReportFormat};
use std::path::{Path, PathBuf};

/// covrelay: run the test suite under coverage and relay the report
///
/// Reads the job identity from CI_JOB_ID, CI_PROVIDER and COVERAGE_TOKEN.
#[derive(Parser, Debug)]
#[command(name = "covrelay")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormatArg,

    /// Configuration file (defaults to ./covrelay.yaml when present)
    #[arg(short, long, env = "COVRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory the coverage report is written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Report format
    #[arg(short, long)]
    pub format: Option<FormatArg>,

    /// Run the tool once, forwarding job identity and writing the report
    #[arg(long)]
    pub single_pass: bool,

    /// Upload endpoint
    #[arg(long, env = "COVRELAY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Print the planned invocations and exit without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl Cli {
    /// Presentation settings
    #[must_use]
    pub fn cli_config(&self) -> CliConfig {
        let verbosity = if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                2 => Verbosity::Debug,
                _ => Verbosity::Trace,
            }
        };

        let mut config = CliConfig::new()
            .with_verbosity(verbosity)
            .with_color(self.color.into())
            .with_log_format(self.log_format.into())
            .with_dry_run(self.dry_run);
        if let Some(path) = &self.summary {
            config = config.with_summary_path(path);
        }
        config
    }

    /// Pipeline configuration: the config file, then flag overrides
    pub fn cov_config(&self, cwd: &Path) -> CliResult<CovConfig> {
        let mut config = CovConfig::discover(self.config.as_deref(), cwd)?;
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(format) = self.format {
            config = config.with_format(format.into());
        }
        if self.single_pass {
            config = config.with_passes(PassMode::SinglePass);
        }
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Color argument for clap
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument for clap
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Report format argument for clap
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FormatArg {
    /// Cobertura XML
    Xml,
    /// LCOV tracefile
    Lcov,
    /// Tarpaulin JSON
    Json,
    /// HTML page
    Html,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xml => Self::Xml,
            FormatArg::Lcov => Self::Lcov,
            FormatArg::Json => Self::Json,
            FormatArg::Html => Self::Html,
        }
    }
}
