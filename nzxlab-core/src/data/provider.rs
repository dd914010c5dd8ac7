//! Price provider trait, history windows, and structured error types.
//!
//! The PriceProvider trait abstracts over price sources (Yahoo Finance,
//! in-memory fixtures in tests) so the download orchestrator never knows
//! where bars come from.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw daily OHLCV bar from a data provider (before validation/adjustment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
}

impl RawBar {
    /// Dividend/split adjusted close, falling back to the raw close.
    pub fn adjusted_price(&self) -> Option<f64> {
        if self.adj_close.is_finite() {
            Some(self.adj_close)
        } else if self.close.is_finite() {
            Some(self.close)
        } else {
            None
        }
    }
}

/// Structured error types for data operations.
///
/// These are displayable in CLI output without further formatting.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached data for symbol '{symbol}'; run `nzxlab prices` first")]
    NoCachedData { symbol: String },

    #[error("data error: {0}")]
    Other(String),
}

/// How much price history to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryWindow {
    /// From the same calendar day `n` years ago up to today.
    Years(u32),
    /// Everything the provider has.
    Max,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Years(10)
    }
}

impl HistoryWindow {
    /// Resolve the window to a concrete `[start, end]` range ending on `today`.
    pub fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match *self {
            HistoryWindow::Years(n) => {
                let year = today.year() - n as i32;
                // Feb 29 has no counterpart in most years; use Feb 28.
                let start = NaiveDate::from_ymd_opt(year, today.month(), today.day())
                    .or_else(|| NaiveDate::from_ymd_opt(year, today.month(), 28))
                    .unwrap_or(today);
                (start, today)
            }
            HistoryWindow::Max => (NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(today), today),
        }
    }
}

/// Result of a successful data fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub bars: Vec<RawBar>,
    pub source: DataSource,
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    Fixture,
}

/// Trait for daily price providers.
///
/// The cache layer sits above this trait; providers don't know about the cache.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily OHLCV bars for a symbol over a date range.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol operations.
///
/// Implementations must be `Sync`: the price download calls them from a worker pool.
pub trait DownloadProgress: Send + Sync {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<(), DataError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress {
    label: &'static str,
}

impl StdoutProgress {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl Default for StdoutProgress {
    fn default() -> Self {
        Self::new("Fetching")
    }
}

impl DownloadProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] {} {symbol}...", index + 1, total, self.label);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<(), DataError>,
    ) {
        match result {
            Ok(()) => println!("  OK: {symbol}"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\n{} complete: {succeeded}/{total} succeeded, {failed} failed", self.label);
    }
}

/// Progress reporter that discards every event.
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _symbol: &str,
        _index: usize,
        _total: usize,
        _result: &Result<(), DataError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn years_window_keeps_calendar_day() {
        let (start, end) = HistoryWindow::Years(10).range(d(2026, 10, 16));
        assert_eq!(start, d(2016, 10, 16));
        assert_eq!(end, d(2026, 10, 16));
    }

    #[test]
    fn years_window_handles_leap_day() {
        let (start, _) = HistoryWindow::Years(1).range(d(2024, 2, 29));
        assert_eq!(start, d(2023, 2, 28));
    }

    #[test]
    fn max_window_starts_at_epoch() {
        let (start, _) = HistoryWindow::Max.range(d(2026, 1, 5));
        assert_eq!(start, d(1970, 1, 1));
    }

    #[test]
    fn adjusted_price_prefers_adj_close() {
        let mut bar = RawBar {
            date: d(2024, 1, 2),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 2.0,
            volume: 0,
            adj_close: 1.5,
        };
        assert_eq!(bar.adjusted_price(), Some(1.5));
        bar.adj_close = f64::NAN;
        assert_eq!(bar.adjusted_price(), Some(2.0));
        bar.close = f64::NAN;
        assert_eq!(bar.adjusted_price(), None);
    }
}
