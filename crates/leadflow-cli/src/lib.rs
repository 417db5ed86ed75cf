//! # leadflow-cli
//!
//! Command-line interface for operating the Leadflow delivery engine.

pub mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use leadflow_core::Config;
use std::path::PathBuf;

/// Leadflow: WhatsApp delivery and CRM synchronization engine.
#[derive(Debug, Parser)]
#[command(name = "leadflow", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "LEADFLOW_CONFIG", default_value = "leadflow.json5")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway, worker pool, and schedulers.
    Serve(commands::serve::ServeArgs),

    /// Inspect and requeue jobs.
    Jobs(commands::jobs::JobsArgs),

    /// Inspect and reset sending numbers.
    Numbers(commands::numbers::NumbersArgs),
}

/// Execute the parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    config.validate().context("validating config")?;

    match cli.command {
        Command::Serve(args) => commands::serve::run(config, args).await,
        Command::Jobs(args) => commands::jobs::run(config, args).await,
        Command::Numbers(args) => commands::numbers::run(config, args).await,
    }
}
