//! Labeled dataset: financial statements joined to forward and past returns.
//!
//! Each statement row is pinned to the last trading day on or before its
//! statement date, then labelled by whether the stock's forward return over
//! the panel horizon beat the benchmark index's.

pub mod asof;
pub mod label;

pub use asof::asof_backward;
pub use label::{build_dataset, LabelOptions};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Errors from building or reading a labeled dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("no financial statements to label")]
    NoStatements,

    #[error("price panel is empty")]
    EmptyPanel,

    #[error("benchmark {symbol} has no rows in the price panel")]
    MissingBenchmark { symbol: String },

    #[error("row {row}: expected {expected} features, found {found}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

pub const TICKER_COLUMN: &str = "Ticker";
pub const DATE_COLUMN: &str = "Date";
pub const TRADE_DATE_COLUMN: &str = "Trade Date";
pub const LABEL_COLUMN: &str = "BeatIndex";
/// Prefix of merged valuation statistic columns.
pub const STAT_PREFIX: &str = "Stat: ";

/// `Next250dayReturn` for a 250-row horizon.
pub fn next_return_column(horizon: usize) -> String {
    format!("Next{horizon}dayReturn")
}

/// `Prev250dayReturn` for a 250-row horizon.
pub fn prev_return_column(horizon: usize) -> String {
    format!("Prev{horizon}dayReturn")
}

/// One labeled statement row. Missing values have already been replaced by 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub trade_date: NaiveDate,
    pub next_return: f64,
    pub benchmark_next_return: f64,
    pub beat_index: bool,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDataset {
    pub horizon: usize,
    pub benchmark: String,
    pub feature_names: Vec<String>,
    pub rows: Vec<DatasetRow>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_return_column(&self) -> String {
        next_return_column(self.horizon)
    }

    /// `Next250dayReturn^NZ50` for the NZX 50 benchmark.
    pub fn benchmark_column(&self) -> String {
        format!("{}{}", next_return_column(self.horizon), self.benchmark)
    }

    /// Full column list: identifiers and targets, then features.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![
            TICKER_COLUMN.to_string(),
            DATE_COLUMN.to_string(),
            TRADE_DATE_COLUMN.to_string(),
            self.next_return_column(),
            self.benchmark_column(),
            LABEL_COLUMN.to_string(),
        ];
        header.extend(self.feature_names.iter().cloned());
        header
    }

    /// Every row must carry one value per feature name.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let expected = self.feature_names.len();
        for (row, r) in self.rows.iter().enumerate() {
            if r.features.len() != expected {
                return Err(DatasetError::RaggedRow {
                    row,
                    expected,
                    found: r.features.len(),
                });
            }
        }
        Ok(())
    }

    pub fn features(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.features.clone()).collect()
    }

    pub fn labels(&self) -> Vec<bool> {
        self.rows.iter().map(|r| r.beat_index).collect()
    }

    /// Share of rows labelled as beating the benchmark.
    pub fn positive_rate(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        self.rows.iter().filter(|r| r.beat_index).count() as f64 / self.rows.len() as f64
    }
}
