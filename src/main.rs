use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use agent_pulse::app;
use agent_pulse::cli::{Cli, Commands};
use agent_pulse::config::PulseConfig;
use agent_pulse::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("agent-pulse error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let mut config = PulseConfig::load()?;
    if let Some(dir) = cli.sessions_dir {
        config.sessions_dir = Some(dir);
    }

    match cli.command {
        Some(Commands::Report { days }) => app::report(&config, days),
        Some(Commands::Anomalies) => app::anomalies(&config),
        Some(Commands::Export { days, output }) => {
            app::export(&config, days, app::resolve_output(output).as_deref())
        }
        Some(Commands::Watch) => app::watch(&config),
        Some(Commands::Paths) => {
            app::print_paths(&config);
            Ok(())
        }
        None => app::report(&config, None),
    }
}
