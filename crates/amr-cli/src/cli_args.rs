use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "amr-dispatch",
    about = "Assigns production tasks to an AMR fleet and learns route costs from completions",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        help = "Log workflow progress at info level (RUST_LOG overrides)"
    )]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Run a fleet/task scenario through the dispatch engine with a simulated fleet.
    Run(RunArgs),
    /// Parse and validate a dispatch config file, then exit.
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(long, help = "Scenario JSON with fleet, tasks and simulated outcomes")]
    pub(crate) scenario: PathBuf,

    #[arg(long, help = "Dispatch config JSON; defaults apply when the file is absent")]
    pub(crate) config: Option<PathBuf>,

    #[arg(
        long = "cost-model",
        help = "Cost model snapshot loaded before the run and rewritten after it"
    )]
    pub(crate) cost_model: Option<PathBuf>,

    #[arg(long, help = "Write the run report (summary, workflows, cost model) here")]
    pub(crate) report: Option<PathBuf>,

    #[arg(
        long = "latency-ms",
        default_value_t = 0,
        help = "Simulated wall-clock latency of every dispatch"
    )]
    pub(crate) latency_ms: u64,
}

#[derive(Debug, Args)]
pub(crate) struct CheckConfigArgs {
    #[arg(long)]
    pub(crate) config: PathBuf,
}
