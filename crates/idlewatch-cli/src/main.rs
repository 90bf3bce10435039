//! `idlewatch` binary: wires the runtime to stdin/stdout and a config file.

mod bootstrap_helpers;
mod cli_args;
mod commands;
mod ndjson_sender;

use anyhow::Result;
use clap::Parser;

use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap_helpers::init_tracing();
    let cli = Cli::parse();
    commands::execute(cli).await
}
