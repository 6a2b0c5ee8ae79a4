//! Tapedeck CLI - headless streaming-audio player
//!
//! Features:
//! - Play an HTTP audio stream through the on-disk cache
//! - Log every player event and a periodic seekability poll
//! - Inspect and clear the media cache

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// Tapedeck CLI - streaming audio with a read-through cache
#[derive(Parser)]
#[command(name = "tapedeck")]
#[command(author = "Tapedeck Contributors")]
#[command(version)]
#[command(about = "Headless streaming-audio player with a read-through media cache", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Cache directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a stream until interrupted
    Play {
        /// Media URI (defaults to the configured stream)
        uri: Option<String>,

        /// Cache eviction strategy
        #[arg(short, long, value_enum)]
        eviction: Option<Eviction>,

        /// Size bound for LRU eviction
        #[arg(long)]
        max_cache_bytes: Option<u64>,

        /// Status poll interval in milliseconds
        #[arg(short, long)]
        poll_interval: Option<u64>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Inspect the media cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached spans
    List,

    /// Remove every cached span
    Clear,
}

/// Eviction strategy selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Eviction {
    /// Keep everything
    None,
    /// Least recently used, bounded by --max-cache-bytes
    Lru,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Play {
            uri,
            eviction,
            max_cache_bytes,
            poll_interval,
            duration,
        } => {
            let overrides = commands::PlayOverrides {
                uri,
                cache_dir: cli.cache_dir,
                eviction,
                max_cache_bytes,
                poll_interval_ms: poll_interval,
            };
            let settings = commands::load_settings(cli.settings.as_deref(), overrides)?;
            commands::play(settings, duration, &cli.format).await?;
        }
        Commands::Cache { action } => {
            let overrides = commands::PlayOverrides {
                cache_dir: cli.cache_dir,
                ..Default::default()
            };
            let settings = commands::load_settings(cli.settings.as_deref(), overrides)?;
            match action {
                CacheAction::List => commands::cache_list(&settings, &cli.format)?,
                CacheAction::Clear => commands::cache_clear(&settings)?,
            }
        }
    }

    Ok(())
}
