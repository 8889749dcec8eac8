mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use crate::cli::{CliArgs, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Compile(compile) => commands::compile(&compile),
        Command::Attributes => {
            print!("{}", commands::attribute_table());
            Ok(())
        }
    }
}
