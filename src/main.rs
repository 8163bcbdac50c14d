use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod materialize;
mod plan;
mod report;
mod suite;
mod templates;
mod tool;
mod util;
mod verify;
mod workflow;

use cli::{Command, RootArgs};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_logging(args.command.verbose());

    match args.command {
        Command::Init(args) => workflow::run_init(args),
        Command::Validate(args) => workflow::run_validate(args),
        Command::Materialize(args) => workflow::run_materialize(args),
        Command::Verify(args) => workflow::run_verify(args),
        Command::Remove(args) => workflow::run_remove(args),
        Command::Run(args) => workflow::run_suite_command(args),
    }
}

/// Logs go to stderr so stdout carries only the PASS/FAIL transcript.
/// `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,dcheck={default_level}")));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
