//! Canopee: batch fetcher for Paris open civic datasets.

use anyhow::Result;
use canopee::{
    config::Config,
    datasets::{paris_catalog, DatasetDescriptor},
    fetch::{AirparifClient, ApiClient, CheckpointStore, FetchSummary, Orchestrator},
    snapshot,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "canopee")]
#[command(about = "Batch fetcher for Paris open civic datasets")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "canopee.toml")]
    config: PathBuf,

    /// Data directory (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch datasets and write CSV snapshots
    Fetch {
        /// Only fetch this dataset (slug)
        #[arg(long)]
        dataset: Option<String>,

        /// Fetch adjacent pages concurrently for the large dataset
        #[arg(long)]
        parallel: bool,

        /// Quiet mode (no progress output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show checkpoint status per dataset
    Status,

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.data_dir)?;

    match cli.command {
        Commands::Fetch {
            dataset,
            parallel,
            quiet,
        } => fetch_datasets(config, dataset, parallel, quiet).await,
        Commands::Status => show_status(config),
        Commands::Init { path } => init_config(path),
    }
}

async fn fetch_datasets(
    mut config: Config,
    only: Option<String>,
    parallel: bool,
    quiet: bool,
) -> Result<()> {
    if parallel {
        config.fetch.parallel_pagination = true;
    }

    let catalog: Vec<DatasetDescriptor> = paris_catalog(&config.data_dir)
        .into_iter()
        .filter(|ds| only.as_ref().is_none_or(|name| &ds.name == name))
        .collect();
    if catalog.is_empty() {
        anyhow::bail!("No dataset matches the requested name");
    }

    let client = ApiClient::new(&config.http)?;
    let checkpoints = CheckpointStore::new(config.data_dir.join("checkpoints"))?;
    let orchestrator =
        Orchestrator::new(client, checkpoints, config.fetch.clone()).with_progress(!quiet);

    let summaries = orchestrator.run_all(&catalog).await;

    if only.is_none() && config.airparif.enabled {
        fetch_airparif(&config).await;
    }

    print_summaries(&summaries);
    Ok(())
}

/// Complementary Airparif feed: one-shot REST query, empty snapshot on
/// failure so the batch result is always complete.
async fn fetch_airparif(config: &Config) {
    let output = config.data_dir.join("raw_airparif_measurements.csv");

    let records = match AirparifClient::new(config.airparif.clone(), &config.http.user_agent) {
        Ok(client) => match client.measurements().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Airparif fetch failed: {}. Writing empty snapshot.", e);
                Vec::new()
            }
        },
        Err(e) => {
            warn!("Airparif client unavailable: {}", e);
            Vec::new()
        }
    };

    let count = records.len();
    if let Err(e) = snapshot::write_csv(&output, &records, false) {
        warn!("Failed to write Airparif snapshot: {}", e);
    } else {
        info!("Wrote {} Airparif records to {}", count, output.display());
    }
}

fn print_summaries(summaries: &[FetchSummary]) {
    println!("\nFetch Summary");
    println!("=============");
    for summary in summaries {
        let via = match summary.fallback {
            Some(trigger) => format!("export ({trigger:?})"),
            None => "pagination".to_string(),
        };
        println!(
            "{:<70} {:>8} records via {}{}",
            summary.dataset,
            summary.records_written,
            via,
            if summary.invalid_districts > 0 {
                format!(", {} unclassified districts", summary.invalid_districts)
            } else {
                String::new()
            }
        );
    }
}

fn show_status(config: Config) -> Result<()> {
    let checkpoints = CheckpointStore::new(config.data_dir.join("checkpoints"))?;

    println!("Checkpoint status");
    println!("=================");
    for dataset in paris_catalog(&config.data_dir) {
        match checkpoints.load(&dataset.name) {
            Some(checkpoint) => println!(
                "{:<70} offset {} (saved {})",
                dataset.name, checkpoint.offset, checkpoint.updated_at
            ),
            None => println!("{:<70} clean", dataset.name),
        }
    }
    Ok(())
}

fn init_config(path: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&path)?;
    let target = path.join("canopee.toml");
    if target.exists() {
        anyhow::bail!("Config file already exists: {}", target.display());
    }

    let config = Config::default();
    std::fs::write(&target, toml::to_string_pretty(&config)?)?;
    info!("Wrote default configuration to {}", target.display());
    Ok(())
}
