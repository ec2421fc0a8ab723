//! ContextForge CLI — the main entry point.
//!
//! Commands:
//! - `show`      — Print one stored context
//! - `list`      — List stored contexts, newest first
//! - `diff`      — Compare two stored contexts
//! - `export`    — Export a stored context for audit
//! - `estimate`  — Estimate tokens and input cost for some text
//! - `config`    — Show, validate or initialize configuration
//! - `status`    — Show ledger and configuration status

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "contextforge",
    about = "ContextForge — budgeted context assembly with replayable lineage",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a stored context by id
    Show {
        id: String,

        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored contexts, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Only contexts older than this id
        #[arg(long)]
        before: Option<String>,

        /// Only contexts with this freshness (guaranteed, degraded, unknown)
        #[arg(long)]
        freshness: Option<String>,

        /// Only contexts produced by this definition
        #[arg(long)]
        context: Option<String>,
    },

    /// Compare two stored contexts
    Diff {
        base: String,
        comparison: String,

        /// Show per-item detail
        #[arg(long)]
        detail: bool,

        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a stored context
    Export {
        id: String,

        #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Estimate tokens and input cost for text
    Estimate {
        /// Text to estimate (reads --file when omitted)
        text: Option<String>,

        /// Model to estimate for (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show ledger and configuration status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
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
        Commands::Show { id, json } => commands::context::show(&id, json).await?,
        Commands::List {
            limit,
            before,
            freshness,
            context,
        } => commands::context::list(limit, before, freshness, context).await?,
        Commands::Diff {
            base,
            comparison,
            detail,
            json,
        } => commands::context::diff(&base, &comparison, detail, json).await?,
        Commands::Export { id, format, output } => {
            commands::context::export(&id, format, output).await?
        }
        Commands::Estimate { text, model, file } => {
            commands::estimate::run(text, model, file).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
