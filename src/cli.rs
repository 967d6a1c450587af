use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "agent-pulse",
    version,
    about = "Usage analytics and live activity for coding-agent session logs"
)]
pub struct Cli {
    /// Directory holding session log files (overrides config and environment).
    #[arg(long, global = true, value_name = "DIR")]
    pub sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize sessions over a trailing window of days.
    Report {
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
    /// List unusual patterns in the last seven days.
    Anomalies,
    /// Print the full report as JSON.
    Export {
        #[arg(long, value_name = "N")]
        days: Option<u32>,
        /// Write to a file instead of stdout ("-" means stdout).
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Follow session files and print live counters until Ctrl+C.
    Watch,
    /// Show the resolved config and sessions paths.
    Paths,
}
