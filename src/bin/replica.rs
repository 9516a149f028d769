//! Replica operator binary

use anyhow::Result;
use clap::{Parser, Subcommand};
use minivol::common::{parse_size, timestamp_now};
use minivol::replica::{FileMetadataReader, MemEngineFactory};
use minivol::{ProcessContext, ReplicaConfig, ReplicaCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minivol-replica")]
#[command(about = "minivol replica control plane", version)]
struct Cli {
    /// Config file (defaults to ./minivol.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replica directory (overrides config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Default sector size in bytes (overrides config)
    #[arg(long)]
    sector_size: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the derived and last committed state
    Status,

    /// Create the replica if it doesn't exist yet
    Create {
        /// Volume size (e.g. 10Gi, 512M, 1073741824)
        #[arg(short, long)]
        size: String,
    },

    /// Print metadata, statistics and usage as JSON
    Info,

    /// Snapshot the current head
    Snapshot {
        /// Snapshot name
        name: String,

        /// Creation time (defaults to now, RFC 3339)
        #[arg(long)]
        created: Option<String>,
    },

    /// Open then delete the replica
    Delete,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ReplicaConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        config.dir = dir;
    }
    if let Some(sector_size) = cli.sector_size {
        config.sector_size = sector_size;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (context, mut monitor) = ProcessContext::new(config.dir.clone());
    let monitor_handle = std::thread::spawn(move || {
        while let Some(action) = monitor.blocking_recv() {
            tracing::info!("Replica action: {}", action);
        }
    });

    let coordinator = ReplicaCoordinator::from_config(
        &config,
        context,
        Arc::new(MemEngineFactory::new()),
        Arc::new(FileMetadataReader),
    );

    tracing::info!("minivol {}", minivol::BUILD_INFO);
    tracing::info!("Replica directory: {}", config.dir.display());

    match cli.command {
        Commands::Status => {
            let (state, _) = coordinator.status();
            let (committed, _) = coordinator.prev_status();
            println!("state: {}", state);
            println!("committed: {}", committed);
        }
        Commands::Create { size } => {
            let size = parse_size(&size)?;
            coordinator.start("create")?;
            coordinator.create(size)?;
            println!("{}", coordinator.status().0);
        }
        Commands::Info => {
            coordinator.start("open")?;
            coordinator.open()?;
            let (state, info) = coordinator.status();
            let out = serde_json::json!({
                "state": state,
                "info": info,
                "stats": coordinator.stats()?,
                "usage": coordinator.get_usage()?,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            coordinator.close()?;
        }
        Commands::Snapshot { name, created } => {
            let created = created.unwrap_or_else(timestamp_now);
            coordinator.start("snapshot")?;
            coordinator.open()?;
            coordinator.snapshot(&name, true, &created)?;
            coordinator.close()?;
            println!("{} {}", name, created);
        }
        Commands::Delete => {
            coordinator.start("delete")?;
            coordinator.open()?;
            coordinator.delete()?;
            println!("{}", coordinator.status().0);
        }
    }

    tracing::debug!("{}", coordinator.metrics().to_prometheus());

    // Dropping the coordinator closes the action queue and ends the monitor
    drop(coordinator);
    if monitor_handle.join().is_err() {
        tracing::warn!("Action monitor thread panicked");
    }

    Ok(())
}
