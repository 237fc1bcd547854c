//! Popug CLI - operator tool for the Popug task tracker and accounting services.
//!
//! Runs engine operations directly against the configured store and broker.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{ledger, schema, task, user};
use output::OutputFormat;
use popug_core::{app::App, config::Config, observability};

/// Popug - task tracker and accounting operator CLI
#[derive(Parser)]
#[command(
    name = "popug",
    version,
    about = "Popug - task tracker and accounting operator CLI",
    long_about = "CLI tool for managing Popug tasks, assignees, the ledger and event schemas.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "POPUG_CONFIG")]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task lifecycle operations
    #[command(subcommand)]
    Task(task::TaskCommands),

    /// Ledger queries
    #[command(subcommand)]
    Ledger(ledger::LedgerCommands),

    /// Publish identity events
    #[command(subcommand)]
    User(user::UserCommands),

    /// Event schema registry
    #[command(subcommand)]
    Schema(schema::SchemaCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = run(cli.command, cli.config.as_deref(), format).await;

    observability::shutdown();

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, config_path: Option<&str>, format: OutputFormat) -> Result<()> {
    // Schema commands need no store or broker.
    if let Commands::Schema(cmd) = command {
        return schema::execute(cmd, format);
    }

    let config = Config::load(config_path)?;
    observability::init(&config.service.name, None, false, "warn")?;
    let app = App::build(config).await?;

    match command {
        Commands::Task(cmd) => task::execute(cmd, &app, format).await,
        Commands::Ledger(cmd) => ledger::execute(cmd, &app, format).await,
        Commands::User(cmd) => user::execute(cmd, &app, format).await,
        Commands::Schema(_) => Ok(()),
    }
}
