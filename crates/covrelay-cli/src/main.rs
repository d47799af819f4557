//! covrelay: coverage in CI, relayed
//!
//! ## Usage
//!
//! ```bash
//! CI_JOB_ID=12345 covrelay                  # acquire, test, report, upload
//! covrelay --format lcov --single-pass      # one tool run, LCOV output
//! covrelay --dry-run                        # print the plan only
//! ```

use clap::Parser;
use covrelay_cli::{Cli, CliResult};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let settings = cli.cli_config();
    covrelay::init_tracing(settings.verbosity.log_level(), settings.log_format);

    let cwd = std::env::current_dir()?;
    let config = cli.cov_config(&cwd)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(covrelay_cli::run(&settings, config))
}
