//! Market data: providers, the Parquet price cache and download orchestration.

pub mod cache;
pub mod circuit_breaker;
pub mod download;
pub mod fundamentals;
pub mod provider;
pub mod statements;
pub mod universe;
pub mod yahoo;

pub use cache::{CacheMeta, CacheStatus, CoverageResult, PriceCache};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use download::{
    clean_bars, download_fundamentals, download_prices, DownloadSummary, FixtureProvider,
    PriceDownloadOptions,
};
pub use fundamentals::{
    display_label, fetch_three_statements, valuation_label, FundamentalsProvider,
    YahooFundamentalsProvider,
};
pub use provider::{
    DataError, DataSource, DownloadProgress, FetchResult, HistoryWindow, PriceProvider, RawBar,
    SilentProgress, StdoutProgress,
};
pub use statements::{
    combine_statements, FundamentalsSet, StatementKind, StatementPeriod, StatementRow,
    ValuationStat,
};
pub use universe::Universe;
pub use yahoo::{classify_status, StatusAction, YahooClient, YahooPriceProvider};
