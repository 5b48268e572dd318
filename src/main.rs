use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::path::PathBuf;

use recall::adapter::AdapterRegistry;
use recall::cli::{self, FilterArgs};
use recall::config::Config;
use recall::identity::get_or_create_device;
use recall::store::Store;

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Local memory layer for AI coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "recall.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover sources and ingest everything once
    Ingest,

    /// Continuous watching
    Watch {
        #[command(subcommand)]
        command: WatchCommands,
    },

    /// Full-text search over ingested events
    Search {
        /// Search query ("a|b" alternation, quoted phrases)
        query: String,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Chronological event timeline with summary
    Timeline {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// File history and point-in-time reconstruction
    File {
        #[command(subcommand)]
        command: FileCommands,
    },

    /// Source management
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Token usage rollups
    Stats {
        #[command(flatten)]
        filter: FilterArgs,

        /// Group rollup: day, session, or model
        #[arg(long, default_value = "model")]
        by: String,
    },
}

#[derive(Subcommand)]
enum WatchCommands {
    /// Run the watch coordinator in the foreground
    Run,
    /// Report whether a coordinator is running
    Status,
    /// Signal a running coordinator to stop
    Stop,
}

#[derive(Subcommand)]
enum FileCommands {
    /// Recorded snapshots and edits for a file
    History {
        file_path: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Reconstruct a file's contents at a point in time
    Show {
        file_path: String,
        /// Point in time (unix seconds, "2h", ISO-8601); default now
        #[arg(long)]
        at: Option<String>,
        /// Restrict the edit stream to one session
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List registered sources
    List,
    /// Register a source by hand
    Add {
        /// jsonl_transcript | split_transcript | plain_transcript | git
        kind: String,
        /// Path to the transcript file or repository root
        locator: String,
        /// Skip secret redaction for this source
        #[arg(long)]
        no_redact: bool,
    },
    /// Remove a source
    Rm {
        source_id: String,
        /// Also delete the source's events
        #[arg(long)]
        purge: bool,
    },
}

fn app_dirs() -> Result<(PathBuf, PathBuf)> {
    let dirs = ProjectDirs::from("", "", "recall").context("No home directory available")?;
    Ok((
        dirs.config_dir().to_path_buf(),
        dirs.data_dir().to_path_buf(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_default();
    let (config_dir, data_dir) = app_dirs()?;

    let device = get_or_create_device(&config_dir)?;
    let store = Store::open(&config.database_path())?;
    store.upsert_device(&device)?;
    let registry = AdapterRegistry::new(&config);

    match cli.command {
        Commands::Ingest => {
            cli::ingest::run(&store, &registry, &device.device_id)?;
        }
        Commands::Watch { command } => match command {
            WatchCommands::Run => {
                tracing_subscriber::fmt()
                    .with_env_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| "recall=info".into()),
                    )
                    .init();
                cli::watch::run(store, registry, config, device.device_id, &data_dir).await?;
            }
            WatchCommands::Status => {
                cli::watch::status(&data_dir)?;
            }
            WatchCommands::Stop => {
                cli::watch::stop(&data_dir)?;
            }
        },
        Commands::Search { query, filter } => {
            cli::search::run(&store, &query, &filter)?;
        }
        Commands::Timeline { filter } => {
            cli::timeline::run(&store, &filter)?;
        }
        Commands::File { command } => match command {
            FileCommands::History { file_path, limit } => {
                cli::file::history(&store, &file_path, limit)?;
            }
            FileCommands::Show {
                file_path,
                at,
                session,
            } => {
                cli::file::show(&store, &file_path, at.as_deref(), session.as_deref())?;
            }
        },
        Commands::Sources { command } => match command {
            SourceCommands::List => {
                cli::sources::list(&store)?;
            }
            SourceCommands::Add {
                kind,
                locator,
                no_redact,
            } => {
                cli::sources::add(&store, &device.device_id, &kind, &locator, no_redact)?;
            }
            SourceCommands::Rm { source_id, purge } => {
                cli::sources::remove(&store, &source_id, purge)?;
            }
        },
        Commands::Stats { filter, by } => {
            cli::stats::run(&store, &filter, &by)?;
        }
    }

    Ok(())
}
