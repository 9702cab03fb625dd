mod bootstrap_helpers;
mod cli_args;
mod commands;
mod scenario;
mod simulator;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    commands::execute(cli.command).await
}
