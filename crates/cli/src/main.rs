//! socmate CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Send one request and print the answer
//! - `chat`    — Interactive streaming session
//! - `config`  — Print the default configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "socmate",
    about = "socmate — conversational assistant for SoC design work",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of ~/.socmate/config.toml
    #[arg(short, long, global = true, env = "SOCMATE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single request and print the final answer
    Ask {
        /// The request, e.g. "lint rtl/top.v and explain the warnings"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Start an interactive session (Ctrl+C aborts the running request)
    Chat,

    /// Print the default configuration
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries model output only.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask { query } => {
            commands::agent::ask(cli.config.as_deref(), &query.join(" "), cli.verbose).await?
        }
        Commands::Chat => commands::agent::chat(cli.config.as_deref(), cli.verbose).await?,
        Commands::Config { path } => commands::config_cmd::run(path),
    }

    Ok(())
}
