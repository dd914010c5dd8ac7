//! nzxlab CLI: NZX price and fundamentals download, labeling and learning.
//!
//! Commands:
//! - `prices`: download prices into the cache and write the prices CSV
//! - `fundamentals`: download statements, label them, write the dataset CSV
//! - `learn`: train the forest on the dataset CSV and print the scores
//! - `run`: every stage in order, optionally reusing the stage CSVs
//! - `cache status`: report cached symbols, date ranges and sizes
//! - `universe`: print the resolved universe as TOML

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nzxlab_core::data::{
    CircuitBreaker, DownloadSummary, HistoryWindow, PriceCache, StdoutProgress, YahooClient,
    YahooFundamentalsProvider, YahooPriceProvider,
};
use nzxlab_runner::{
    fundamentals_stage, learn_stage, load_dataset_csv, load_prices_csv, prices_stage,
    run_pipeline, LearnReport, PipelineConfig, Providers, StageSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "nzxlab",
    about = "nzxlab CLI: do NZX fundamentals predict beating the NZX 50?"
)]
struct Cli {
    /// Pipeline config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `nzxlab_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download prices, build the panel and write the prices CSV.
    Prices {
        /// Only the first N tickers.
        #[arg(long)]
        limit: Option<usize>,

        /// Full available history instead of the configured window.
        #[arg(long, default_value_t = false)]
        max_history: bool,

        /// Refetch even when the cache covers the window.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Download statements, label them against the prices CSV, write the dataset CSV.
    Fundamentals {
        /// Only the first N tickers.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Train and score the classifier on the dataset CSV.
    Learn,
    /// Run every stage.
    Run {
        /// Start from the prices CSV instead of downloading.
        #[arg(long, default_value_t = false)]
        reuse_prices: bool,

        /// Start from the dataset CSV; skips both download stages.
        #[arg(long, default_value_t = false)]
        reuse_dataset: bool,

        /// Only the first N tickers.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the resolved universe as TOML.
    Universe,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, date ranges and sizes.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Prices {
            limit,
            max_history,
            force,
        } => {
            apply_limit(&mut config, limit);
            if max_history {
                config.prices.history = HistoryWindow::Max;
            }
            config.prices.force |= force;
            run_prices(&config)
        }
        Commands::Fundamentals { limit } => {
            apply_limit(&mut config, limit);
            run_fundamentals(&config)
        }
        Commands::Learn => run_learn(&config),
        Commands::Run {
            reuse_prices,
            reuse_dataset,
            limit,
        } => {
            apply_limit(&mut config, limit);
            run_all(
                &config,
                StageSource {
                    reuse_prices,
                    reuse_dataset,
                },
            )
        }
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config.cache.dir),
        },
        Commands::Universe => {
            print!("{}", config.universe()?.to_toml().map_err(anyhow::Error::msg)?);
            Ok(())
        }
    }
}

/// `--log-level` wins over `RUST_LOG`; `info` otherwise. Logs go to stderr.
fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
        .init();
}

fn apply_limit(config: &mut PipelineConfig, limit: Option<usize>) {
    if limit.is_some() {
        config.universe.limit = limit;
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

/// Yahoo providers sharing one HTTP client and circuit breaker.
struct YahooProviders {
    prices: YahooPriceProvider,
    fundamentals: YahooFundamentalsProvider,
}

impl YahooProviders {
    fn new() -> Result<Self> {
        let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
        let http = Arc::new(YahooClient::new(circuit_breaker)?);
        Ok(Self {
            prices: YahooPriceProvider::new(Arc::clone(&http)),
            fundamentals: YahooFundamentalsProvider::new(http),
        })
    }
}

fn report_failures(stage: &str, summary: &DownloadSummary) {
    if summary.all_succeeded() {
        return;
    }
    eprintln!(
        "{stage}: {} of {} symbols failed: {}",
        summary.failed,
        summary.total,
        summary.failed_symbols().join(", ")
    );
}

fn run_prices(config: &PipelineConfig) -> Result<()> {
    let yahoo = YahooProviders::new()?;
    let outcome = prices_stage(
        config,
        &yahoo.prices,
        &StdoutProgress::new("Prices"),
        today(),
    )?;
    report_failures("prices", &outcome.download);
    println!(
        "Panel: {} rows, {} tickers, {} dates -> {}",
        outcome.panel.len(),
        outcome.panel.tickers().len(),
        outcome.panel.dates().len(),
        config.output.prices_path().display()
    );
    println!("Price data: {}", short_hash(&outcome.price_hash));
    Ok(())
}

fn run_fundamentals(config: &PipelineConfig) -> Result<()> {
    let panel = load_prices_csv(&config.output.prices_path())
        .context("run `nzxlab prices` first")?;
    let yahoo = YahooProviders::new()?;
    let outcome = fundamentals_stage(
        config,
        &yahoo.fundamentals,
        &StdoutProgress::new("Fundamentals"),
        &panel,
    )?;
    report_failures("fundamentals", &outcome.download);
    println!(
        "Dataset: {} rows, {} features, {:.1}% beat {} -> {}",
        outcome.dataset.len(),
        outcome.dataset.feature_names.len(),
        outcome.dataset.positive_rate() * 100.0,
        outcome.dataset.benchmark,
        config.output.dataset_path().display()
    );
    Ok(())
}

fn run_learn(config: &PipelineConfig) -> Result<()> {
    let dataset = load_dataset_csv(&config.output.dataset_path())
        .context("run `nzxlab fundamentals` first")?;
    let report = learn_stage(config, &dataset)?;
    print_report(config, &report);
    Ok(())
}

fn run_all(config: &PipelineConfig, source: StageSource) -> Result<()> {
    let yahoo = YahooProviders::new()?;
    let progress = StdoutProgress::default();
    let outcome = run_pipeline(
        config,
        Providers {
            prices: &yahoo.prices,
            fundamentals: &yahoo.fundamentals,
            progress: &progress,
        },
        source,
        today(),
    )?;
    if let Some(summary) = &outcome.prices {
        report_failures("prices", summary);
    }
    if let Some(summary) = &outcome.fundamentals {
        report_failures("fundamentals", summary);
    }
    if let Some(hash) = &outcome.price_hash {
        println!("Price data: {}", short_hash(hash));
    }
    print_report(config, &outcome.report);
    Ok(())
}

fn print_report(config: &PipelineConfig, report: &LearnReport) {
    println!();
    print!("{}", report.render());
    println!("Report: {}", config.output.report_path().display());
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let statuses = PriceCache::new(cache_dir).list()?;
    let total_size: u64 = statuses.iter().map(|s| s.size_bytes).sum();

    println!("Cache: {}", cache_dir.display());
    println!("Symbols: {}", statuses.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<10} {:<25} {:>8} {:>10}", "Symbol", "Date Range", "Bars", "Size");
    println!("{}", "-".repeat(56));
    for status in &statuses {
        let (range, bars) = match &status.meta {
            Some(meta) => (
                format!("{} to {}", meta.start_date, meta.end_date),
                meta.bar_count.to_string(),
            ),
            None => ("(no metadata)".to_string(), "?".to_string()),
        };
        println!(
            "{:<10} {:<25} {:>8} {:>10}",
            status.symbol,
            range,
            bars,
            format_size(status.size_bytes)
        );
    }

    Ok(())
}

fn short_hash(hash: &str) -> &str {
    &hash[..12.min(hash.len())]
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nzxlab",
            "run",
            "--reuse-prices",
            "--limit",
            "2",
            "--config",
            "nzx.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("nzx.toml")));
        match cli.command {
            Commands::Run {
                reuse_prices,
                reuse_dataset,
                limit,
            } => {
                assert!(reuse_prices);
                assert!(!reuse_dataset);
                assert_eq!(limit, Some(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn limit_only_overrides_when_given() {
        let mut config = PipelineConfig::default();
        config.universe.limit = Some(5);
        apply_limit(&mut config, None);
        assert_eq!(config.universe.limit, Some(5));
        apply_limit(&mut config, Some(2));
        assert_eq!(config.universe().unwrap().ticker_count(), 2);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn short_hash_truncates_to_twelve() {
        assert_eq!(short_hash(&"ab".repeat(32)), "abababababab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
