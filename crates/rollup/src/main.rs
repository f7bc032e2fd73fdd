//! `rollup` binary: runs aggregations and the operational checks around them.

use clap::{Parser, Subcommand};
use rollup::METRICS;
use rollup_logging::LogConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "rollup", about = "Transaction aggregation and file generation")]
struct Cli {
    /// Settings file (default: $ROLLUP_HOME/rollup.toml)
    #[arg(long, global = true, env = "ROLLUP_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, overriding the settings file
    #[arg(long, global = true, env = "ROLLUP_DB")]
    db: Option<PathBuf>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resume stalled work, then run one configuration or every current one
    Run(cli::run::RunArgs),

    /// Check which configuration a prefix search resolves to
    VerifyConfig(cli::verify::VerifyArgs),

    /// Finish stalled groups and held control files
    Resume(cli::run::ResumeArgs),

    /// Report where a set of transaction lines ended up
    Validate(cli::validate::ValidateArgs),

    /// Delete load-test transactions and generated file details
    Cleanup(cli::cleanup::CleanupArgs),
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = cli::Context::load(cli.config.as_deref(), cli.db)?;
    match cli.command {
        Commands::Run(args) => cli::run::run(&ctx, args),
        Commands::VerifyConfig(args) => cli::verify::run(&ctx, args),
        Commands::Resume(args) => cli::run::resume(&ctx, args),
        Commands::Validate(args) => cli::validate::run(&ctx, args),
        Commands::Cleanup(args) => cli::cleanup::run(&ctx, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = rollup_logging::init_logging(LogConfig {
        app_name: "rollup",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let result = run_command(cli);

    match serde_json::to_string(&METRICS.snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Run metrics"),
        Err(err) => info!(error = %err, "Run metrics unavailable"),
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}
