use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    // Parsed before logging init because the verbosity flags feed the filter.
    let cli = storybookify::cli::Cli::parse();
    storybookify::logging::init(cli.default_log_level()).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    storybookify::build::run(cli).context("build epub")
}
