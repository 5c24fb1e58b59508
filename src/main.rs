//! # docmirror CLI (`mirror`)
//!
//! ## Usage
//!
//! ```bash
//! mirror --config ./config/mirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mirror init` | Create the SQLite database and run schema migrations |
//! | `mirror sources` | List configured sources with their sync state |
//! | `mirror sync <source\|all>` | Sync now, optionally forcing a strategy |
//! | `mirror trigger <source>` | Make a source due for the scheduler |
//! | `mirror runs <source>` | Show recent sync runs |
//! | `mirror schedule` | Run the background scheduler |
//! | `mirror webhook <provider> <file>` | Process a saved webhook payload |
//! | `mirror chunk <file> --type <t>` | Preview how a file would be chunked |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use docmirror::app::App;
use docmirror::{config, logging, migrate, sources, sync_cmd};
use docmirror_core::models::{SourceType, SyncStrategy};

/// docmirror: mirror wikis, issue trackers and code hosts into a local
/// catalog and chunk index.
#[derive(Parser)]
#[command(name = "mirror", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mirror.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured sources and their sync state.
    Sources,

    /// Sync a source now.
    Sync {
        /// Source id, or `all`.
        source: String,

        /// Force a strategy (`full`, `incremental`, `event_driven`) instead of
        /// letting the engine choose.
        #[arg(long)]
        strategy: Option<SyncStrategy>,
    },

    /// Schedule a source for the next scheduler tick.
    Trigger {
        source: String,

        /// Delay in minutes instead of running at the next tick.
        #[arg(long)]
        in_minutes: Option<i64>,
    },

    /// Show recent sync runs of a source.
    Runs {
        source: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Run the scheduler until interrupted.
    Schedule,

    /// Process a webhook payload saved to a file.
    Webhook {
        /// `confluence`, `jira` or `bitbucket`.
        provider: String,

        /// JSON payload file.
        payload: PathBuf,

        /// Signature header value (`sha256=<hex>`).
        #[arg(long)]
        signature: Option<String>,
    },

    /// Preview how a local file would be chunked.
    Chunk {
        file: PathBuf,

        /// Source type whose chunking policy to apply.
        #[arg(long = "type", default_value = "filesystem")]
        source_type: SourceType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Chunk { file, source_type } => {
            sync_cmd::preview_chunks(&cfg, &file, source_type)?;
        }
        command => {
            let app = App::open(cfg).await?;
            let result = match command {
                Commands::Sources => sources::list_sources(&app).await,
                Commands::Sync { source, strategy } => {
                    sync_cmd::run_sync(&app, &source, strategy).await
                }
                Commands::Trigger { source, in_minutes } => {
                    sync_cmd::trigger(&app, &source, in_minutes).await
                }
                Commands::Runs { source, limit } => sync_cmd::show_runs(&app, &source, limit).await,
                Commands::Schedule => sync_cmd::run_scheduler(&app).await,
                Commands::Webhook {
                    provider,
                    payload,
                    signature,
                } => sync_cmd::run_webhook(&app, &provider, &payload, signature.as_deref()).await,
                Commands::Init | Commands::Chunk { .. } => Ok(()),
            };
            app.close().await;
            result?;
        }
    }

    Ok(())
}
