use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use superstore_rust::config::{Settings, LOG_ENV_VAR};
use superstore_rust::{export, geocode, DashboardView, Dataset, DatasetCache, FilterSpec};

#[derive(Parser)]
#[command(name = "superstore")]
#[command(about = "Clean a Superstore orders table and derive engagement metrics")]
struct Cli {
    /// YAML settings file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Raw orders CSV
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// City coordinate cache CSV
    #[arg(long, global = true)]
    coords: Option<PathBuf>,

    /// Never call the geocoder; unknown places stay without coordinates
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print headline metrics and load statistics as JSON
    Summary,
    /// Write the cleaned table with derived columns and coordinates
    Clean {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write per-customer order aggregates and lifetime value
    Customers {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write the cohort retention matrix
    Cohorts {
        #[arg(short, long)]
        output: PathBuf,

        /// Write distinct customer counts instead of rates
        #[arg(long)]
        counts: bool,
    },
    /// Print the dashboard view for a filter as JSON
    View {
        #[arg(long = "category")]
        categories: Vec<String>,

        #[arg(long = "region")]
        regions: Vec<String>,

        /// First order date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last order date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn settings_from(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(input) = &cli.input {
        settings.input_path = input.clone();
    }
    if let Some(coords) = &cli.coords {
        settings.coords_path = coords.clone();
    }
    if cli.offline {
        settings.geocoder.enabled = false;
    }
    Ok(settings)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = settings_from(&cli)?;
    let geocoder = geocode::from_settings(&settings.geocoder).context("failed to set up geocoder")?;

    let mut cache = DatasetCache::new();
    let dataset = cache
        .get_or_load(&settings, geocoder.as_ref())
        .with_context(|| format!("failed to process {}", settings.input_path.display()))?;

    match cli.command {
        Command::Summary => {
            let metrics = &dataset.metrics;
            print_json(&json!({
                "average_order_value": metrics.average_order_value,
                "repeat_purchase_rate": metrics.repeat_purchase_rate,
                "total_customers": metrics.total_customers,
                "load": dataset.stats,
                "coordinates": dataset.coords,
                "cohorts": dataset.cohorts.retention.cohorts.len(),
            }))?;
        }
        Command::Clean { output } => {
            export::write_transactions(&output, &dataset.transactions)?;
            info!(
                rows = dataset.transactions.len(),
                "cleaned table written | output={}",
                output.display()
            );
        }
        Command::Customers { output } => {
            export::write_customers(&output, &dataset.metrics.customers)?;
            info!(
                customers = dataset.metrics.customers.len(),
                "customer table written | output={}",
                output.display()
            );
        }
        Command::Cohorts { output, counts } => {
            if counts {
                export::write_matrix(&output, &dataset.cohorts.sizes)?;
            } else {
                export::write_matrix(&output, &dataset.cohorts.retention)?;
            }
            info!(
                cohorts = dataset.cohorts.retention.cohorts.len(),
                "cohort matrix written | output={}",
                output.display()
            );
        }
        Command::View {
            categories,
            regions,
            from,
            to,
        } => {
            let spec = filter_spec(&dataset, categories, regions, from, to);
            print_json(&DashboardView::build(&dataset, &spec))?;
        }
    }

    Ok(())
}

fn filter_spec(
    dataset: &Dataset,
    categories: Vec<String>,
    regions: Vec<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> FilterSpec {
    let all = FilterSpec::all(dataset);
    FilterSpec {
        categories: if categories.is_empty() {
            all.categories
        } else {
            categories.into_iter().collect::<BTreeSet<_>>()
        },
        regions: if regions.is_empty() {
            all.regions
        } else {
            regions.into_iter().collect::<BTreeSet<_>>()
        },
        start: from.or(all.start),
        end: to.or(all.end),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli)
}
