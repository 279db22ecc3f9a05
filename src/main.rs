mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cardbox::config::CardboxConfig;
use cli::search::SearchMode;

#[derive(Parser)]
#[command(name = "cardbox", version, about = "Personal knowledge card store")]
struct Cli {
    /// Config file (defaults to ~/.cardbox/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show card, deck and index statistics
    Stats,
    /// Search cards by text (default), semantic similarity or tag
    Search {
        query: String,
        #[arg(long, conflicts_with = "tag")]
        semantic: bool,
        #[arg(long)]
        tag: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Export the card graph as JSON (stdout by default)
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Seal the export with a password-derived key
        #[arg(long, env = "CARDBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Replace the card graph with a JSON or encrypted snapshot
    Import {
        file: PathBuf,
        #[arg(long, env = "CARDBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Zip archives holding the card graph and the media directory
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },
}

#[derive(Subcommand)]
enum ArchiveAction {
    /// Write cards.json and media/ into a zip file
    Export { file: PathBuf },
    /// Restore cards and media from a zip file
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CardboxConfig::load_from(path)?,
        None => CardboxConfig::load()?,
    };

    // Log to stderr so stdout stays clean for JSON export.
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Search {
            query,
            semantic,
            tag,
            limit,
        } => {
            let mode = if semantic {
                SearchMode::Semantic
            } else if tag {
                SearchMode::Tag
            } else {
                SearchMode::Text
            };
            cli::search::search(&config, &query, mode, limit).await?;
        }
        Command::Export { output, password } => {
            cli::export::export(&config, output.as_deref(), password.as_deref()).await?;
        }
        Command::Import { file, password } => {
            cli::import::import(&config, &file, password.as_deref()).await?;
        }
        Command::Archive { action } => match action {
            ArchiveAction::Export { file } => cli::archive::export_archive(&config, &file).await?,
            ArchiveAction::Import { file } => cli::archive::import_archive(&config, &file).await?,
        },
    }

    Ok(())
}
