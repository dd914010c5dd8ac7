//! Download orchestration: prices on a worker pool, fundamentals one ticker at a time.

use super::cache::{CoverageResult, PriceCache};
use super::fundamentals::{fetch_three_statements, FundamentalsProvider};
use super::provider::{
    DataError, DataSource, DownloadProgress, FetchResult, HistoryWindow, PriceProvider, RawBar,
};
use super::statements::{FundamentalsSet, StatementPeriod};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashMap;

/// Knobs for [`download_prices`].
#[derive(Debug, Clone)]
pub struct PriceDownloadOptions {
    /// Worker threads fetching symbols concurrently.
    pub threads: usize,
    /// Refetch even when the cache covers the window.
    pub force: bool,
    /// How stale the newest cached bar may be and still count as covering today.
    pub tolerance_days: i64,
    /// The day the history window ends on.
    pub today: NaiveDate,
}

impl PriceDownloadOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            threads: 8,
            force: false,
            tolerance_days: 5,
            today,
        }
    }
}

/// Download price history for every symbol into the cache.
///
/// Symbols whose cache already covers the window are skipped unless
/// `opts.force` is set. Once the provider reports itself unavailable (the
/// circuit breaker tripped) the remaining symbols fail without a request.
pub fn download_prices(
    provider: &dyn PriceProvider,
    cache: &PriceCache,
    symbols: &[String],
    window: HistoryWindow,
    opts: &PriceDownloadOptions,
    progress: &dyn DownloadProgress,
) -> DownloadSummary {
    let total = symbols.len();
    let (start, end) = window.range(opts.today);

    let fetch_one = |(i, symbol): (usize, &String)| {
        progress.on_start(symbol, i, total);
        let result = if !opts.force && cache_is_fresh(cache, symbol, start, end, opts) {
            tracing::debug!(symbol = %symbol, "cache covers window, skipping fetch");
            Ok(())
        } else if !provider.is_available() {
            Err(DataError::CircuitBreakerTripped)
        } else {
            download_single(provider, cache, symbol, start, end)
        };
        progress.on_complete(symbol, i, total, &result);
        (symbol.clone(), result)
    };

    let results: Vec<(String, Result<(), DataError>)> =
        match rayon::ThreadPoolBuilder::new().num_threads(opts.threads.max(1)).build() {
            Ok(pool) => pool.install(|| symbols.par_iter().enumerate().map(fetch_one).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "could not build download pool, fetching sequentially");
                symbols.iter().enumerate().map(fetch_one).collect()
            }
        };

    let summary = DownloadSummary::from_results(results);
    progress.on_batch_complete(summary.succeeded, summary.failed, summary.total);
    summary
}

/// A `Max` window starts at the epoch, so only a cache fetched for `Max`
/// covers it; a `Max` cache covers every narrower window.
fn cache_is_fresh(
    cache: &PriceCache,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    opts: &PriceDownloadOptions,
) -> bool {
    matches!(
        cache.covers_range(symbol, start, end, opts.tolerance_days),
        CoverageResult::FullyCovered
    )
}

/// Fetch → clean → cache for one symbol.
fn download_single(
    provider: &dyn PriceProvider,
    cache: &PriceCache,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), DataError> {
    let fetched = provider.fetch(symbol, start, end)?;
    let bars = clean_bars(symbol, fetched.bars)?;
    cache.write(symbol, &bars, fetched.source, start)?;
    tracing::info!(symbol, bars = bars.len(), "cached price history");
    Ok(())
}

/// Sort by date, keep the last bar of a repeated date and drop bars without
/// any usable price.
pub fn clean_bars(symbol: &str, mut bars: Vec<RawBar>) -> Result<Vec<RawBar>, DataError> {
    bars.retain(|b| b.adjusted_price().is_some());
    bars.sort_by_key(|b| b.date);

    let mut out: Vec<RawBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }

    if out.is_empty() {
        return Err(DataError::ValidationError(format!(
            "{symbol}: no bars with a usable price"
        )));
    }
    Ok(out)
}

/// Download statements (and optionally valuation statistics) for every ticker.
///
/// `tickers` are Yahoo symbols. A failed ticker is recorded and skipped.
pub fn download_fundamentals(
    provider: &dyn FundamentalsProvider,
    tickers: &[String],
    period: StatementPeriod,
    with_valuation: bool,
    progress: &dyn DownloadProgress,
) -> (FundamentalsSet, DownloadSummary) {
    let total = tickers.len();
    let mut set = FundamentalsSet::default();
    let mut results = Vec::with_capacity(total);

    for (i, ticker) in tickers.iter().enumerate() {
        progress.on_start(ticker, i, total);

        let result = if provider.is_available() {
            fetch_fundamentals(provider, ticker, period, with_valuation, &mut set)
        } else {
            Err(DataError::CircuitBreakerTripped)
        };

        progress.on_complete(ticker, i, total, &result);
        results.push((ticker.clone(), result));
    }

    let summary = DownloadSummary::from_results(results);
    progress.on_batch_complete(summary.succeeded, summary.failed, summary.total);
    (set, summary)
}

fn fetch_fundamentals(
    provider: &dyn FundamentalsProvider,
    ticker: &str,
    period: StatementPeriod,
    with_valuation: bool,
    set: &mut FundamentalsSet,
) -> Result<(), DataError> {
    let rows = fetch_three_statements(provider, ticker, period)?;
    let valuation = if with_valuation {
        provider.valuation_stats(ticker)?
    } else {
        Vec::new()
    };
    tracing::info!(
        ticker,
        statements = rows.len(),
        valuation = valuation.len(),
        "fetched fundamentals"
    );
    set.statements.extend(rows);
    set.valuation.extend(valuation);
    Ok(())
}

/// Summary of a batch download operation.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
}

impl DownloadSummary {
    fn from_results(results: Vec<(String, Result<(), DataError>)>) -> Self {
        let total = results.len();
        let errors: Vec<(String, DataError)> = results
            .into_iter()
            .filter_map(|(symbol, r)| r.err().map(|e| (symbol, e)))
            .collect();
        Self {
            total,
            succeeded: total - errors.len(),
            failed: errors.len(),
            errors,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Symbols that failed, in download order.
    pub fn failed_symbols(&self) -> Vec<&str> {
        self.errors.iter().map(|(s, _)| s.as_str()).collect()
    }
}

/// A provider that serves fixed bars, for tests and offline runs.
pub struct FixtureProvider {
    bars: HashMap<String, Vec<RawBar>>,
}

impl FixtureProvider {
    pub fn new(bars: impl IntoIterator<Item = (String, Vec<RawBar>)>) -> Self {
        Self {
            bars: bars.into_iter().collect(),
        }
    }
}

impl PriceProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect();
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars,
            source: DataSource::Fixture,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::SilentProgress;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_cache() -> (PriceCache, std::path::PathBuf) {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "nzxlab_download_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_dir_all(&dir);
        (PriceCache::new(&dir), dir)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> RawBar {
        RawBar {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
            adj_close: close,
        }
    }

    struct CountingProvider {
        inner: FixtureProvider,
        calls: AtomicUsize,
    }

    impl PriceProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        fn fetch(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(symbol, start, end)
        }
        fn is_available(&self) -> bool {
            true
        }
    }

    struct TrippedProvider;

    impl PriceProvider for TrippedProvider {
        fn name(&self) -> &str {
            "tripped"
        }
        fn fetch(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            panic!("fetch must not be called while the breaker is open");
        }
        fn is_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn clean_bars_sorts_dedups_and_drops_priceless() {
        let mut nan = bar(d(2024, 1, 4), f64::NAN);
        nan.close = f64::NAN;
        let bars = vec![
            bar(d(2024, 1, 3), 2.0),
            bar(d(2024, 1, 2), 1.0),
            bar(d(2024, 1, 3), 2.5),
            nan,
        ];
        let cleaned = clean_bars("X", bars).unwrap();
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[1].close, 2.5);
        assert!(clean_bars("X", Vec::new()).is_err());
    }

    #[test]
    fn downloads_then_reuses_cache() {
        let (cache, dir) = temp_cache();
        let today = d(2024, 3, 1);
        let provider = CountingProvider {
            inner: FixtureProvider::new(vec![
                ("AIR.NZ".to_string(), vec![bar(d(2014, 3, 3), 1.0), bar(d(2024, 2, 29), 2.0)]),
                ("^NZ50".to_string(), vec![bar(d(2014, 3, 3), 10.0), bar(d(2024, 2, 29), 11.0)]),
            ]),
            calls: AtomicUsize::new(0),
        };
        let symbols = vec!["AIR.NZ".to_string(), "^NZ50".to_string(), "BAD.NZ".to_string()];
        let opts = PriceDownloadOptions::new(today);

        let first = download_prices(
            &provider,
            &cache,
            &symbols,
            HistoryWindow::Years(10),
            &opts,
            &SilentProgress,
        );
        assert_eq!(first.succeeded, 2);
        assert_eq!(first.failed_symbols(), vec!["BAD.NZ"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let second = download_prices(
            &provider,
            &cache,
            &symbols[..2],
            HistoryWindow::Years(10),
            &opts,
            &SilentProgress,
        );
        assert!(second.all_succeeded());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_breaker_fails_remaining_symbols() {
        let (cache, dir) = temp_cache();
        let symbols = vec!["A".to_string(), "B".to_string()];
        let summary = download_prices(
            &TrippedProvider,
            &cache,
            &symbols,
            HistoryWindow::Max,
            &PriceDownloadOptions::new(d(2024, 1, 1)),
            &SilentProgress,
        );
        assert_eq!(summary.failed, 2);
        assert!(summary
            .errors
            .iter()
            .all(|(_, e)| matches!(e, DataError::CircuitBreakerTripped)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn listed_since_2000() -> CountingProvider {
        CountingProvider {
            inner: FixtureProvider::new(vec![(
                "AIR.NZ".to_string(),
                vec![
                    bar(d(2000, 3, 1), 1.0),
                    bar(d(2014, 3, 3), 2.0),
                    bar(d(2024, 2, 29), 3.0),
                ],
            )]),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn max_history_refetches_a_ten_year_cache() {
        let (cache, dir) = temp_cache();
        let provider = listed_since_2000();
        let symbols = vec!["AIR.NZ".to_string()];
        let opts = PriceDownloadOptions::new(d(2024, 3, 1));

        download_prices(&provider, &cache, &symbols, HistoryWindow::Years(10), &opts, &SilentProgress);
        assert_eq!(cache.get_meta("AIR.NZ").unwrap().start_date, d(2014, 3, 3));

        let summary =
            download_prices(&provider, &cache, &symbols, HistoryWindow::Max, &opts, &SilentProgress);
        assert!(summary.all_succeeded());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let meta = cache.get_meta("AIR.NZ").unwrap();
        assert_eq!(meta.start_date, d(2000, 3, 1));
        assert_eq!(meta.bar_count, 3);

        download_prices(&provider, &cache, &symbols, HistoryWindow::Max, &opts, &SilentProgress);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn max_cache_serves_a_ten_year_window() {
        let (cache, dir) = temp_cache();
        let provider = listed_since_2000();
        let symbols = vec!["AIR.NZ".to_string()];
        let today = d(2024, 3, 1);
        let opts = PriceDownloadOptions::new(today);

        download_prices(&provider, &cache, &symbols, HistoryWindow::Max, &opts, &SilentProgress);
        download_prices(&provider, &cache, &symbols, HistoryWindow::Years(10), &opts, &SilentProgress);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let (start, end) = HistoryWindow::Years(10).range(today);
        let bars = cache.load_range("AIR.NZ", start, end).unwrap();
        assert_eq!(bars.first().map(|b| b.date), Some(d(2014, 3, 3)));
        assert_eq!(bars.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn late_listing_is_not_refetched_every_run() {
        let (cache, dir) = temp_cache();
        let provider = CountingProvider {
            inner: FixtureProvider::new(vec![(
                "NEW.NZ".to_string(),
                vec![bar(d(2021, 6, 1), 1.0), bar(d(2024, 2, 29), 2.0)],
            )]),
            calls: AtomicUsize::new(0),
        };
        let symbols = vec!["NEW.NZ".to_string()];
        let opts = PriceDownloadOptions::new(d(2024, 3, 1));

        for window in [HistoryWindow::Years(10), HistoryWindow::Years(10), HistoryWindow::Years(5)] {
            download_prices(&provider, &cache, &symbols, window, &opts, &SilentProgress);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
