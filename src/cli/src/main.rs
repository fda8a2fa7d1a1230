//! LifeOS CLI - submit commands to a kernel and read today's state.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, events, health, submit, today};
use output::OutputFormat;

/// LifeOS - event-sourced life management CLI
#[derive(Parser)]
#[command(
    name = "lifeos",
    version,
    about = "LifeOS - event-sourced life management",
    long_about = "Submit commands to a LifeOS kernel and inspect the derived state, suggestions and event log.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "LIFEOS_API_URL")]
    api_url: Option<String>,

    /// User to act as
    #[arg(short, long, global = true, env = "LIFEOS_USER")]
    user: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a command
    Submit(submit::SubmitArgs),

    /// Show today's state and suggestions
    Today(today::TodayArgs),

    /// List logged events
    Events(events::EventsArgs),

    /// Check server health
    Health,

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let saved = config::load().unwrap_or_default();
    let api_url = cli
        .api_url
        .clone()
        .or(saved.api_url)
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let user = cli
        .user
        .clone()
        .or(saved.user)
        .unwrap_or_else(|| "local".to_string());

    let client = client::ApiClient::new(&api_url, &user)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Submit(args) => submit::execute(args, saved.tz, &client, format).await,
        Commands::Today(args) => today::execute(args, saved.tz, &client, format).await,
        Commands::Events(args) => events::execute(args, &client, format).await,
        Commands::Health => health::execute(&client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
