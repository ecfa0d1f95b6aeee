//! WDP - weather data pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use wdp_common::logging::{init_logging, LogConfig, LogLevel};
use wdp_common::types::BatchHandle;
use wdp_pipeline::config::PipelineConfig;
use wdp_pipeline::driver::{PipelineDriver, RunReport};
use wdp_pipeline::extract::Extractor;
use wdp_pipeline::load::CsvSink;
use wdp_pipeline::source::OpenWeatherClient;
use wdp_pipeline::staging::{MemoryStagingStore, PgStagingStore, StagingStore};
use wdp_pipeline::transform::Transformer;

#[derive(Parser, Debug)]
#[command(name = "wdp")]
#[command(author, version, about = "Batch-correlated weather ETL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline configuration file
    #[arg(short, long, global = true, env = "WDP_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run extract, transform and load once
    Run {
        /// Stage in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Extract one batch and print its handle
    Extract,

    /// Transform a staged batch and write the rows as JSON
    Transform {
        /// Batch handle printed by `extract`
        #[arg(short, long)]
        batch: BatchHandle,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Append rows produced by `transform` to the sink
    Load {
        /// JSON file holding an array of rows
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Transform and load a batch that is already staged
    Replay {
        #[arg(short, long)]
        batch: BatchHandle,
    },

    /// Validate configuration and test the staging database
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // LOG_* variables take precedence over --verbose
    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .build()
            .merge_env()?
    } else {
        LogConfig::from_env()?
    };

    init_logging(&log_config)?;

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Run { dry_run } => {
            let store: Arc<dyn StagingStore> = if dry_run {
                warn!("Dry run: staged rows are kept in memory only");
                Arc::new(MemoryStagingStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };
            let report = driver(&config, store)?.run_once().await?;
            print_report(&report);
        },
        Command::Extract => {
            let store = Arc::new(connect(&config).await?);
            let source = Arc::new(OpenWeatherClient::new(&config.source)?);
            let extractor = Extractor::new(source, store, config.rate_limit_delay());
            let batch = extractor.extract(&config.subjects).await?;
            println!("{batch}");
        },
        Command::Transform { batch, output } => {
            let store = Arc::new(connect(&config).await?);
            let rows = Transformer::new(store).transform(batch).await?;
            let json = serde_json::to_string_pretty(&rows)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(rows = rows.len(), path = %path.display(), "Wrote transformed rows");
                },
                None => println!("{json}"),
            }
        },
        Command::Load { input } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let sink = CsvSink::new(config.sink.location.clone());
            let report = tokio::task::spawn_blocking(move || sink.load_json(&json)).await??;
            println!(
                "Loaded {} rows into {} ({} bytes)",
                report.rows_written,
                config.sink.location.display(),
                report.sink_bytes
            );
        },
        Command::Replay { batch } => {
            let store: Arc<dyn StagingStore> = Arc::new(connect(&config).await?);
            let report = driver(&config, store)?.replay(batch).await?;
            print_report(&report);
        },
        Command::Check => {
            let store = connect(&config).await?;
            store.ping().await?;
            println!("Configuration OK: {} subjects", config.subjects.len());
            println!("Staging database OK, migrations applied");
        },
    }

    Ok(())
}

async fn connect(config: &PipelineConfig) -> Result<PgStagingStore> {
    let store = PgStagingStore::connect(&config.database).await?;
    store.migrate().await?;
    Ok(store)
}

fn driver(config: &PipelineConfig, store: Arc<dyn StagingStore>) -> Result<PipelineDriver> {
    let source = Arc::new(OpenWeatherClient::new(&config.source)?);
    Ok(PipelineDriver::new(
        config.subjects.clone(),
        source,
        store,
        CsvSink::new(config.sink.location.clone()),
        config.rate_limit_delay(),
    ))
}

fn print_report(report: &RunReport) {
    println!("Batch:   {}", report.batch);
    println!("Run:     {}", report.run_id);
    if !report.staged.is_empty() || !report.skipped.is_empty() {
        println!("Staged:  {}", report.staged.len());
    }
    for subject in &report.skipped {
        println!("Skipped: {subject}");
    }
    println!("Rows:    {}", report.rows_transformed);
    println!("Sink:    {} bytes", report.load.sink_bytes);
}
