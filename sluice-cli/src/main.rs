mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Run declarative file-based workflows, rebuilding only what is stale
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run stale work items
    Run(commands::run::RunArgs),
    /// Show which work items are stale and why, without running anything
    Show(commands::show::ShowArgs),
    /// Check a pipeline file and print its task graph
    Validate(commands::validate::ValidateArgs),
    /// Print the resolved parameter map
    Config(commands::config::ConfigArgs),
    /// Inspect or clear checkpoint records
    Checkpoints(commands::checkpoints::CheckpointsArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "sluice_engine=debug,sluice=debug",
        _ => "sluice_engine=trace,sluice=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Show(args) => commands::show::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Config(args) => commands::config::execute(args),
        Command::Checkpoints(args) => commands::checkpoints::execute(args).await,
    }
}
