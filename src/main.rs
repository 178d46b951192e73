//! # Chapterloom CLI (`chapterloom`)
//!
//! ## Usage
//!
//! ```bash
//! chapterloom --config ./config/chapterloom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chapterloom init` | Create the SQLite cache database |
//! | `chapterloom plan <file>` | Show how a chapter will be segmented |
//! | `chapterloom enhance <file>` | Enhance a chapter and print the result |
//! | `chapterloom summarize <file>` | Enhance, then summarize group by group |
//! | `chapterloom cache stats` | Show cache size |
//! | `chapterloom cache clear` | Empty the cache |
//!
//! Segment failures are reported on stderr but never fail the command;
//! the exit code is non-zero only for configuration, I/O, or database errors.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chapterloom::config;
use chapterloom::enhance::{self, EnhanceOptions};
use chapterloom::progress::ProgressMode;
use chapterloom::{cache_cmd, migrate};

/// Chapterloom: segment long chapters, enhance them through an AI text
/// service, and reassemble the result.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chapterloom.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chapterloom",
    about = "Segment long chapters, enhance them through an AI text service, and reassemble the result",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chapterloom.toml")]
    config: PathBuf,

    /// Log level for diagnostics on stderr. `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Print the segment plan for a chapter without calling the service.
    ///
    /// Works without a config file (defaults are used).
    Plan {
        /// Chapter file (.txt, .md, .html, .docx, .pdf).
        file: PathBuf,
    },

    /// Enhance a chapter and print the reassembled text.
    Enhance {
        /// Chapter file (.txt, .md, .html, .docx, .pdf).
        file: PathBuf,

        /// Write the result to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Prefix segments still showing original text with a status line.
        #[arg(long)]
        markers: bool,

        /// Discard the result for segment INDEX and transform it again.
        /// May be repeated.
        #[arg(long, value_name = "INDEX")]
        regenerate: Vec<usize>,

        /// Progress output on stderr. Defaults to human on a terminal, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Enhance a chapter, then summarize each group of consecutive segments.
    Summarize {
        /// Chapter file (.txt, .md, .html, .docx, .pdf).
        file: PathBuf,

        /// Segments per summary group (overrides `summary.group_size`).
        #[arg(long)]
        group_size: Option<usize>,

        /// Progress output on stderr. Defaults to human on a terminal, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Inspect or empty the segment cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and size.
    Stats,
    /// Delete every cached result.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

fn progress_mode(arg: Option<ProgressArg>) -> ProgressMode {
    match arg {
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        Some(ProgressArg::Off) => ProgressMode::Off,
        None => ProgressMode::default_for_tty(),
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // `plan` never touches the service or the database.
    if let Commands::Plan { file } = &cli.command {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            config::Config::minimal()
        };
        return enhance::run_plan(&cfg, file).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Plan { .. } => {}
        Commands::Enhance {
            file,
            output,
            markers,
            regenerate,
            progress,
        } => {
            let options = EnhanceOptions {
                output,
                markers,
                regenerate,
                progress: progress_mode(progress),
            };
            enhance::run_enhance(&cfg, &file, &options).await?;
        }
        Commands::Summarize {
            file,
            group_size,
            progress,
        } => {
            enhance::run_summarize(&cfg, &file, group_size, progress_mode(progress)).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache_cmd::run_stats(&cfg).await?,
            CacheAction::Clear => cache_cmd::run_clear(&cfg).await?,
        },
    }

    Ok(())
}
