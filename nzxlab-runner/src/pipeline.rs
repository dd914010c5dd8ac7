//! Stage orchestration: prices → fundamentals and labels → learn.
//!
//! Each data stage persists its CSV so a later run can start from the file
//! instead of the network ([`StageSource`]).

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use nzxlab_core::data::{
    download_fundamentals, download_prices, DownloadProgress, DownloadSummary,
    FundamentalsProvider, PriceCache, PriceDownloadOptions, PriceProvider,
};
use nzxlab_core::dataset::{build_dataset, LabeledDataset};
use nzxlab_core::fingerprint::RunFingerprint;
use nzxlab_core::model::{train_test_split, ClassificationMetrics, RandomForest, TrainTestSplit};
use nzxlab_core::panel::{build_panel, PricePanel};

use crate::config::PipelineConfig;
use crate::data_loader::load_price_history;
use crate::export::{load_dataset_csv, load_prices_csv, save_dataset_csv, save_prices_csv, save_valuation_csv};
use crate::report::{LearnReport, SCHEMA_VERSION};

/// The outside world the pipeline talks to.
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub prices: &'a dyn PriceProvider,
    pub fundamentals: &'a dyn FundamentalsProvider,
    pub progress: &'a dyn DownloadProgress,
}

/// Which stages start from their CSV instead of recomputing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSource {
    pub reuse_prices: bool,
    pub reuse_dataset: bool,
}

#[derive(Debug)]
pub struct PricesOutcome {
    pub panel: PricePanel,
    pub download: DownloadSummary,
    /// Symbols left out of the panel for lack of cached bars.
    pub missing: Vec<String>,
    /// BLAKE3 over the bars the panel was built from.
    pub price_hash: String,
}

#[derive(Debug)]
pub struct FundamentalsOutcome {
    pub dataset: LabeledDataset,
    pub download: DownloadSummary,
}

/// Result of [`run_pipeline`]. Download summaries are absent for stages
/// that were read from file.
#[derive(Debug)]
pub struct RunOutcome {
    pub prices: Option<DownloadSummary>,
    pub fundamentals: Option<DownloadSummary>,
    /// Hash of the panel's source bars when the prices stage ran.
    pub price_hash: Option<String>,
    pub report: LearnReport,
}

fn log_failures(stage: &str, summary: &DownloadSummary) {
    for (symbol, error) in &summary.errors {
        tracing::warn!(stage, symbol = %symbol, error = %error, "download failed");
    }
}

/// Download prices into the cache, build the panel and write the prices CSV.
pub fn prices_stage(
    config: &PipelineConfig,
    provider: &dyn PriceProvider,
    progress: &dyn DownloadProgress,
    today: NaiveDate,
) -> Result<PricesOutcome> {
    let universe = config.universe()?;
    let symbols = universe.price_symbols();
    let cache = PriceCache::new(&config.cache.dir);

    let opts = PriceDownloadOptions {
        threads: config.prices.threads,
        force: config.prices.force,
        ..PriceDownloadOptions::new(today)
    };
    tracing::info!(
        symbols = symbols.len(),
        history = ?config.prices.history,
        provider = provider.name(),
        "downloading prices"
    );
    let download = download_prices(
        provider,
        &cache,
        &symbols,
        config.prices.history,
        &opts,
        progress,
    );
    log_failures("prices", &download);

    let (start, end) = config.prices.history.range(today);
    let loaded = load_price_history(&cache, &symbols, start, end)
        .context("no prices to build a panel from")?;
    let panel = build_panel(&loaded.bars, config.prices.horizon);
    tracing::info!(
        rows = panel.len(),
        dates = panel.dates().len(),
        tickers = panel.tickers().len(),
        price_hash = %loaded.price_hash,
        "built price panel"
    );
    save_prices_csv(&panel, &config.output.prices_path())?;

    Ok(PricesOutcome {
        panel,
        download,
        missing: loaded.missing,
        price_hash: loaded.price_hash,
    })
}

/// Download statements (and valuation statistics), label them against the
/// panel and write the dataset and valuation CSVs.
pub fn fundamentals_stage(
    config: &PipelineConfig,
    provider: &dyn FundamentalsProvider,
    progress: &dyn DownloadProgress,
    panel: &PricePanel,
) -> Result<FundamentalsOutcome> {
    let universe = config.universe()?;
    let tickers = universe.equity_symbols();
    tracing::info!(
        tickers = tickers.len(),
        period = ?config.fundamentals.period,
        provider = provider.name(),
        "downloading fundamentals"
    );
    let (fundamentals, download) = download_fundamentals(
        provider,
        &tickers,
        config.fundamentals.period,
        config.fundamentals.valuation_stats,
        progress,
    );
    log_failures("fundamentals", &download);
    if fundamentals.statements.is_empty() {
        bail!(
            "no financial statements downloaded ({} of {} tickers failed)",
            download.failed,
            download.total
        );
    }

    if config.fundamentals.valuation_stats {
        save_valuation_csv(&fundamentals.valuation, &config.output.valuation_path())?;
    }

    let dataset = build_dataset(&fundamentals, panel, &universe, &config.dataset)
        .context("failed to label statements")?;
    tracing::info!(
        rows = dataset.len(),
        features = dataset.feature_names.len(),
        positive_rate = dataset.positive_rate(),
        "built dataset"
    );
    save_dataset_csv(&dataset, &config.output.dataset_path())?;

    Ok(FundamentalsOutcome { dataset, download })
}

/// Split, fit the forest, score the held-out rows and save the report.
pub fn learn_stage(config: &PipelineConfig, dataset: &LabeledDataset) -> Result<LearnReport> {
    dataset.validate()?;
    let split_seed = config.learn.split_seed.unwrap_or_else(rand::random);
    let split = train_test_split(dataset.len(), config.learn.test_ratio, split_seed)?;

    let features = dataset.features();
    let labels = dataset.labels();
    let train_x = TrainTestSplit::take(&features, &split.train);
    let train_y = TrainTestSplit::take(&labels, &split.train);
    let test_x = TrainTestSplit::take(&features, &split.test);
    let test_y = TrainTestSplit::take(&labels, &split.test);

    let mut forest = RandomForest::new(config.forest());
    tracing::info!(
        train = train_x.len(),
        test = test_x.len(),
        trees = forest.config().n_trees,
        split_seed,
        "fitting random forest"
    );
    forest.fit(&train_x, &train_y, &dataset.feature_names)?;
    let predicted = forest.predict(&test_x)?;
    let metrics = ClassificationMetrics::compute(&test_y, &predicted)?;

    let fingerprint = RunFingerprint::new(dataset, forest.config(), split_seed)
        .context("failed to fingerprint run")?;
    let report = LearnReport {
        schema_version: SCHEMA_VERSION,
        train_rows: train_x.len(),
        test_rows: test_x.len(),
        positive_rate: dataset.positive_rate(),
        metrics,
        top_features: forest
            .ranked_importances()
            .into_iter()
            .take(config.learn.top_features)
            .collect(),
        split_seed,
        fingerprint,
    };
    report.save(&config.output.report_path())?;
    tracing::info!(
        accuracy = report.metrics.accuracy,
        precision = report.metrics.precision,
        "learn stage complete"
    );
    Ok(report)
}

/// Run every stage, reading a stage's CSV instead when `source` asks for it.
///
/// A reused dataset makes the prices stage unnecessary, so it is skipped.
pub fn run_pipeline(
    config: &PipelineConfig,
    providers: Providers<'_>,
    source: StageSource,
    today: NaiveDate,
) -> Result<RunOutcome> {
    let mut prices_summary = None;
    let mut price_hash = None;
    let mut fundamentals_summary = None;

    let dataset = if source.reuse_dataset {
        let path = config.output.dataset_path();
        tracing::info!(path = %path.display(), "reusing dataset");
        load_dataset_csv(&path)?
    } else {
        let panel = if source.reuse_prices {
            let path = config.output.prices_path();
            tracing::info!(path = %path.display(), "reusing prices");
            let panel = load_prices_csv(&path)?;
            if panel.horizon() != config.prices.horizon {
                tracing::warn!(
                    file = panel.horizon(),
                    config = config.prices.horizon,
                    "prices file horizon differs from config; using the file's"
                );
            }
            panel
        } else {
            let outcome = prices_stage(config, providers.prices, providers.progress, today)
                .context("prices stage failed")?;
            prices_summary = Some(outcome.download);
            price_hash = Some(outcome.price_hash);
            outcome.panel
        };

        let outcome =
            fundamentals_stage(config, providers.fundamentals, providers.progress, &panel)
                .context("fundamentals stage failed")?;
        fundamentals_summary = Some(outcome.download);
        outcome.dataset
    };

    let report = learn_stage(config, &dataset).context("learn stage failed")?;
    Ok(RunOutcome {
        prices: prices_summary,
        fundamentals: fundamentals_summary,
        price_hash,
        report,
    })
}
