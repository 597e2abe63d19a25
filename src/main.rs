use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recrawl::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "recrawl",
    version,
    about = "Work queue, freshness and response cache tooling for incremental re-crawls",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file (defaults to RECRAWL_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// Cache backend selector
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Backend {
    /// Redis hash + sorted set
    Ephemeral,
    /// PostgreSQL table
    Durable,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the freshest (or stalest) URLs of a collection to a queue
    Schedule {
        /// Sitemap collection name
        collection: String,

        /// Number of URLs to schedule (all when omitted)
        #[arg(short, long)]
        n: Option<usize>,

        /// Schedule the least recently modified URLs first
        #[arg(long, default_value = "false")]
        oldest_first: bool,

        /// Push to the head of the queue
        #[arg(long, default_value = "false")]
        priority: bool,

        /// Destination queue key (defaults to keys.start_urls)
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Delete the freshness index of a collection
    Reset {
        /// Sitemap collection name
        collection: String,
    },

    /// Print queued items as JSON lines without removing them
    Dump {
        /// Queue key (defaults to keys.items)
        #[arg(short, long)]
        key: Option<String>,

        /// Maximum number of items to print
        #[arg(short, long, default_value = "10")]
        n: usize,
    },

    /// Drain the items queue to stdout until Ctrl-C or overflow
    Drain {
        /// Queue key (defaults to keys.items)
        #[arg(short, long)]
        key: Option<String>,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Push every cached URL to a queue
    SeedFromCache {
        /// Cache backend to read
        #[arg(short, long, value_enum, default_value = "ephemeral")]
        backend: Backend,

        /// Destination queue key (defaults to keys.start_urls)
        #[arg(short, long)]
        key: Option<String>,

        /// Maximum number of URLs to push
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Copy ephemeral cache entries between two Redis instances
    MigrateCache {
        /// Source Redis URL
        #[arg(long)]
        source: String,

        /// Destination Redis URL
        #[arg(long)]
        dest: String,

        /// Number of entries to copy (all when omitted)
        #[arg(short, long)]
        n: Option<usize>,

        /// Pick entries uniformly at random
        #[arg(long, default_value = "false")]
        random: bool,
    },

    /// Remove ephemeral cache entries fetched more than `days` ago
    EvictCache {
        /// Maximum entry age in days
        #[arg(short, long)]
        days: u32,
    },

    /// Create the PostgreSQL cache schema
    InitDb,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = recrawl::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    match cli.command {
        Commands::Schedule {
            collection,
            n,
            oldest_first,
            priority,
            queue,
        } => {
            tracing::info!(
                collection = %collection,
                n = ?n,
                oldest_first = %oldest_first,
                priority = %priority,
                "Starting schedule command"
            );
            commands::schedule(
                &config,
                commands::ScheduleParams {
                    collection,
                    n,
                    oldest_first,
                    priority,
                    queue,
                },
            )
            .await?;
        }

        Commands::Reset { collection } => {
            tracing::info!(collection = %collection, "Starting reset command");
            commands::reset(&config, &collection).await?;
        }

        Commands::Dump { key, n } => {
            commands::dump(&config, key, n).await?;
        }

        Commands::Drain { key, workers } => {
            tracing::info!(key = ?key, workers = ?workers, "Starting drain command");
            commands::drain(&config, key, workers).await?;
        }

        Commands::SeedFromCache {
            backend,
            key,
            limit,
        } => {
            tracing::info!(
                backend = ?backend,
                key = ?key,
                limit = ?limit,
                "Starting seed-from-cache command"
            );
            commands::seed_from_cache(&config, backend, key, limit).await?;
        }

        Commands::MigrateCache {
            source,
            dest,
            n,
            random,
        } => {
            tracing::info!(n = ?n, random = %random, "Starting migrate-cache command");
            commands::migrate_cache(&config, &source, &dest, n, random).await?;
        }

        Commands::EvictCache { days } => {
            tracing::info!(days = %days, "Starting evict-cache command");
            commands::evict_cache(&config, days).await?;
        }

        Commands::InitDb => {
            commands::init_db(&config).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    // Logs go to stderr; stdout is reserved for JSON lines
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("recrawl=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("recrawl={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    Ok(())
}
