//! nzxlab runner: configuration, stage orchestration, CSV files and reports.
//!
//! This crate builds on `nzxlab-core` to provide:
//! - TOML pipeline configuration
//! - Price history loading from the Parquet cache
//! - The prices, fundamentals and learn stages, separately or chained
//! - CSV persistence of the panel, the labeled dataset and valuation stats
//! - The classifier report, printed and saved as JSON

pub mod config;
pub mod data_loader;
pub mod export;
pub mod pipeline;
pub mod report;

pub use config::{ConfigError, PipelineConfig};
pub use data_loader::{load_price_history, LoadError, LoadedPrices};
pub use export::{
    load_dataset_csv, load_prices_csv, read_dataset_csv, read_prices_csv, save_dataset_csv,
    save_prices_csv, save_valuation_csv, write_dataset_csv, write_prices_csv,
    write_valuation_csv, DATE_FORMAT,
};
pub use pipeline::{
    fundamentals_stage, learn_stage, prices_stage, run_pipeline, FundamentalsOutcome,
    PricesOutcome, Providers, RunOutcome, StageSource,
};
pub use report::LearnReport;
