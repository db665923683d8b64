use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

mod cli;
mod hunt;
mod report;

fn main() -> Result<ExitCode> {
    cli::run_cli(cli::Cli::parse())
}
