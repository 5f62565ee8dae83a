mod types;
mod indicators;
mod exchange;
mod engine;
mod config;
mod database;
mod error;
mod ml;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::PipelineConfig;
use database::Database;
use exchange::{BarSource, YahooClient};

#[derive(Parser)]
#[command(name = "fx-forecaster")]
#[command(version = "0.1.0")]
#[command(about = "EUR/USD walk-forward random forest training and next-day forecast", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars and store them with derived metrics
    Ingest {
        /// Clear stored bars before inserting
        #[arg(long)]
        rebuild: bool,
    },
    /// Train the forest period by period over the stored history
    Train {
        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,
    },
    /// Forecast the next close from the persisted model
    Forecast {
        /// First date of the input window (YYYY-MM-DD)
        #[arg(long)]
        window_start: Option<String>,
        /// Last date of the input window (YYYY-MM-DD)
        #[arg(long)]
        cutoff: Option<String>,
        /// Output CSV file path
        #[arg(short, long)]
        output: Option<String>,
        /// Forecast date (YYYY-MM-DD), defaults to the weekday after cutoff
        #[arg(long)]
        target_date: Option<String>,
    },
    /// Show stored data and the last training run
    Status,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = PipelineConfig::load(&cli.config)?;

    match cli.command {
        Commands::Ingest { rebuild } => {
            run_ingest(&config, rebuild).await?;
        }
        Commands::Train { start, end } => {
            let start = start.as_deref().map(parse_date).transpose()?;
            let end = end.as_deref().map(parse_date).transpose()?;
            if let (Some(s), Some(e)) = (start, end) {
                if e < s {
                    return Err(anyhow!("End date must not be before start date"));
                }
            }
            run_training(&config, start, end).await?;
        }
        Commands::Forecast { window_start, cutoff, output, target_date } => {
            if let Some(d) = window_start {
                config.forecast.window_start = parse_date(&d)?;
            }
            if let Some(d) = cutoff {
                config.forecast.cutoff = parse_date(&d)?;
            }
            if let Some(path) = output {
                config.forecast.output = path;
            }
            if let Some(d) = target_date {
                config.forecast.target_date = Some(parse_date(&d)?);
            }
            config.validate().map_err(error::PipelineError::InvalidConfig)?;
            run_forecast(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Config => {
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| anyhow!("Invalid date '{}'. Use YYYY-MM-DD", s))
}

async fn run_ingest(config: &PipelineConfig, rebuild: bool) -> Result<()> {
    info!("=== Ingesting {} ===", config.data.symbol);

    let db = Database::new(&config.storage.database_url).await?;
    let source = YahooClient::new()?;
    info!("Source: {}", source.name());

    let today = Utc::now().date_naive();
    let result = engine::run_ingest(&db, &source, &config.data, today, rebuild).await;
    db.close().await;

    let report = result?;
    info!(
        "Ingest complete: {} fetched, {} cleared, {} new rows ({} requests today)",
        report.fetched, report.cleared, report.inserted, report.requests_today
    );
    Ok(())
}

async fn run_training(config: &PipelineConfig, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    info!("=== Walk-Forward Training ===");
    info!(
        "Trees: {} initial, +{} per period, {}-fold CV",
        config.training.initial_trees, config.training.trees_per_period, config.training.cv_folds
    );

    let db = Database::new(&config.storage.database_url).await?;
    let result = engine::run_walk_forward(&db, config, start, end).await;
    db.close().await;

    let report = result?;
    for period in &report.periods {
        if period.skipped {
            info!("  Period {}: skipped (no rows)", period.index);
        } else {
            info!(
                "  Period {}: {} rows, {} trees, CV {}, in-sample {}",
                period.index,
                period.rows,
                period.n_trees,
                period
                    .cv_mean_accuracy
                    .map_or_else(|| "n/a".to_string(), |a| format!("{:.4}", a)),
                period
                    .in_sample_accuracy
                    .map_or_else(|| "n/a".to_string(), |a| format!("{:.4}", a)),
            );
        }
    }
    info!(
        "Run {}: {} periods trained, {} skipped, {} trees saved to {}",
        report.run_id,
        report.periods_trained(),
        report.periods_skipped(),
        report.n_trees,
        report.artifact_path.display()
    );
    Ok(())
}

async fn run_forecast(config: &PipelineConfig) -> Result<()> {
    info!("=== Forecast ===");

    let db = Database::new(&config.storage.database_url).await?;
    let result = engine::run_forecast(&db, Path::new(&config.storage.artifact_path), &config.forecast).await;
    db.close().await;

    let forecast = result?;
    info!("Target date:     {}", forecast.target_date);
    info!("Forecast close:  {:.5}", forecast.forecast_close);
    info!("Std dev:         {:.5}", forecast.std_dev);
    info!("Mean signal:     {:.3}", forecast.mean_prediction_signal);
    info!("Band:            [{:.5}, {:.5}]", forecast.lower_bound, forecast.upper_bound);
    Ok(())
}

async fn show_status(config: &PipelineConfig) -> Result<()> {
    let db = Database::new(&config.storage.database_url).await?;
    let today = Utc::now().date_naive();

    let result = async {
        let summary = db.bar_summary().await?;
        let requests = db.request_count(today).await?;
        let last_run = db.last_training_run().await?;
        Ok::<_, anyhow::Error>((summary, requests, last_run))
    }
    .await;
    db.close().await;
    let (summary, requests, last_run) = result?;

    info!("=== Status ===");
    match summary {
        Some(s) => info!("Stored bars: {} ({} to {})", s.count, s.first_date, s.last_date),
        None => warn!("No bars stored yet"),
    }
    info!("Requests today ({}): {}", today, requests);
    match last_run {
        Some(run) => info!(
            "Last training run {} at {}: {} periods trained, {} skipped, {} trees, mean CV {}",
            run.run_id,
            run.trained_at.format("%Y-%m-%d %H:%M:%S"),
            run.periods_trained,
            run.periods_skipped,
            run.n_trees,
            run.mean_cv_accuracy
                .map_or_else(|| "n/a".to_string(), |a| format!("{:.4}", a))
        ),
        None => info!("No training runs recorded"),
    }

    let artifact = Path::new(&config.storage.artifact_path);
    if artifact.exists() {
        info!("Model artifact: {}", artifact.display());
    } else {
        warn!("Model artifact missing: {}", artifact.display());
    }
    Ok(())
}
