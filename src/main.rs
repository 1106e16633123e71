use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedsync::collector::{
    ActiveChannelRegistry, ChannelFetcher, CollectionCycle, LoggingConsumer, Supervisor,
};
use feedsync::config::{Config, ConfigSource, EnvConfigSource, FileConfigSource};
use feedsync::metrics;
use feedsync::storage::{connect_pool, PgChannelStore, PgFeedSink, PgFeedSource};
use feedsync::sync::BatchReplicator;
use feedsync::utils::retry::RetryConfig;

#[derive(Parser)]
#[command(
    name = "feedsync",
    version,
    about = "Telemetry channel collector and feed replicator",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to FEEDSYNC_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every active channel on the configured interval until Ctrl-C
    Collect {
        /// Print Prometheus metrics after stopping
        #[arg(long, default_value = "false")]
        dump_metrics: bool,
    },

    /// Replicate new feed rows from the source to the destination database
    Sync {
        /// Keep replicating every collector interval until Ctrl-C
        #[arg(long, default_value = "false", conflicts_with = "catch_up")]
        follow: bool,

        /// Run up to N batches, stopping early at the first short batch
        #[arg(long, value_name = "N")]
        catch_up: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to register Prometheus metrics");
    }

    tracing::info!("feedsync starting");

    match cli.command {
        Commands::Collect { dump_metrics } => {
            tracing::info!(
                interval_ms = config.collector.interval_ms,
                policy = ?config.collector.overlap_policy,
                "Starting collect command"
            );
            collect(&config, dump_metrics).await?;
        }

        Commands::Sync { follow, catch_up } => {
            tracing::info!(
                batch_size = config.sync.batch_size,
                follow,
                catch_up = ?catch_up,
                "Starting sync command"
            );
            sync(&config, follow, catch_up).await?;
        }
    }

    tracing::info!("feedsync finished");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => FileConfigSource::new(path)
            .load_validated()
            .with_context(|| format!("loading {}", path.display()))?,
        None => EnvConfigSource
            .load_validated()
            .context("loading configuration from environment")?,
    };
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("feedsync=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("feedsync={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

async fn collect(config: &Config, dump_metrics: bool) -> Result<()> {
    let retry = RetryConfig::from_collector(&config.collector);
    let pool = connect_pool(
        &config.database.destination_url,
        config.database.pool_size,
        &retry,
    )
    .await
    .context("connecting to destination database")?;

    let channels = Arc::new(PgChannelStore::new(pool));
    let fetcher = ChannelFetcher::new(&config.api, channels.clone())?;
    let cycle = CollectionCycle::new(
        ActiveChannelRegistry::new(channels),
        Arc::new(fetcher),
        Arc::new(LoggingConsumer),
    );

    let mut supervisor = Supervisor::new(cycle, &config.collector);
    supervisor.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    if let Some(stats) = supervisor.stop().await {
        println!("{stats}");
    }

    if dump_metrics {
        match metrics::encode_metrics() {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    Ok(())
}

async fn sync(config: &Config, follow: bool, catch_up: Option<usize>) -> Result<()> {
    let retry = RetryConfig::from_collector(&config.collector);
    let source_pool = connect_pool(&config.database.source_url, config.database.pool_size, &retry)
        .await
        .context("connecting to source database")?;
    let destination_pool = connect_pool(
        &config.database.destination_url,
        config.database.pool_size,
        &retry,
    )
    .await
    .context("connecting to destination database")?;

    let replicator = BatchReplicator::from_config(
        Arc::new(PgFeedSource::new(source_pool)),
        Arc::new(PgFeedSink::new(destination_pool)),
        &config.sync,
    )
    .await?;

    if let Some(max_batches) = catch_up {
        let report = replicator.sync_until_caught_up(max_batches).await?;
        println!(
            "Replicated {} rows, cursor at {}",
            report.processed, report.last_id
        );
        return Ok(());
    }

    if !follow {
        let report = replicator.sync_databases().await?;
        println!(
            "Replicated {} rows, cursor at {}",
            report.processed, report.last_id
        );
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut total = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed batch is re-read on the next tick
                match replicator.sync_databases().await {
                    Ok(report) => total += report.processed,
                    Err(e) => tracing::error!(
                        category = e.category().as_str(),
                        error = %e,
                        "Replication batch failed"
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    println!(
        "Replicated {total} rows, cursor at {}",
        replicator.cursor().await
    );
    Ok(())
}
