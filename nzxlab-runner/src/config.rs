//! Pipeline configuration, loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) gives the
//! full NZX run: 119 tickers, ten years of prices, a 250-day horizon,
//! annual statements and a 100-tree forest.

use nzxlab_core::data::{HistoryWindow, StatementPeriod, Universe};
use nzxlab_core::dataset::LabelOptions;
use nzxlab_core::model::{ForestConfig, MaxFeatures};
use nzxlab_core::panel::DEFAULT_HORIZON;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("universe: {0}")]
    Universe(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub universe: UniverseSection,
    pub prices: PricesSection,
    pub fundamentals: FundamentalsSection,
    pub dataset: LabelOptions,
    pub learn: LearnSection,
    pub output: OutputSection,
    pub cache: CacheSection,
}

/// Which tickers and indices to use. Fields left out fall back to the
/// universe file, then to the built-in NZX universe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseSection {
    pub file: Option<PathBuf>,
    pub tickers: Option<Vec<String>>,
    pub indices: Option<Vec<String>>,
    pub benchmark: Option<String>,
    /// Keep only the first `limit` tickers.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricesSection {
    /// `{ years = 10 }` or `"max"`.
    pub history: HistoryWindow,
    /// Trading days looked back and ahead.
    pub horizon: usize,
    /// Download worker threads.
    pub threads: usize,
    /// Refetch even when the cache covers the window.
    pub force: bool,
}

impl Default for PricesSection {
    fn default() -> Self {
        Self {
            history: HistoryWindow::default(),
            horizon: DEFAULT_HORIZON,
            threads: 8,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalsSection {
    pub period: StatementPeriod,
    /// Also fetch the quote-summary valuation statistics.
    pub valuation_stats: bool,
}

impl Default for FundamentalsSection {
    fn default() -> Self {
        Self {
            period: StatementPeriod::Annual,
            valuation_stats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnSection {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub test_ratio: f64,
    /// Forest seed.
    pub seed: u64,
    /// Train/test split seed; a fresh random seed per run when absent.
    pub split_seed: Option<u64>,
    /// Feature importances listed in the report.
    pub top_features: usize,
}

impl Default for LearnSection {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            test_ratio: 0.2,
            seed: 0,
            split_seed: None,
            top_features: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
    pub prices_file: String,
    pub dataset_file: String,
    pub valuation_file: String,
    pub report_file: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prices_file: "_stock_prices.csv".into(),
            dataset_file: "_three_statements.csv".into(),
            valuation_file: "_valuation_stats.csv".into(),
            report_file: "learn_report.json".into(),
        }
    }
}

impl OutputSection {
    pub fn prices_path(&self) -> PathBuf {
        self.dir.join(&self.prices_file)
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.dir.join(&self.dataset_file)
    }

    pub fn valuation_path(&self) -> PathBuf {
        self.dir.join(&self.valuation_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.universe()?;
        if self.prices.horizon == 0 {
            return Err(ConfigError::Invalid("prices.horizon must be at least 1".into()));
        }
        if self.prices.threads == 0 {
            return Err(ConfigError::Invalid("prices.threads must be at least 1".into()));
        }
        if !(self.learn.test_ratio > 0.0 && self.learn.test_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "learn.test_ratio must be between 0 and 1, got {}",
                self.learn.test_ratio
            )));
        }
        self.forest()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Resolve the universe: file or built-in list, then inline overrides,
    /// then the ticker limit.
    pub fn universe(&self) -> Result<Universe, ConfigError> {
        let section = &self.universe;
        let mut universe = match &section.file {
            Some(path) => Universe::from_file(path).map_err(ConfigError::Universe)?,
            None => Universe::default_nzx(),
        };
        if let Some(tickers) = &section.tickers {
            universe.tickers = tickers.clone();
        }
        if let Some(indices) = &section.indices {
            universe.indices = indices.clone();
        }
        if let Some(benchmark) = &section.benchmark {
            universe.benchmark = benchmark.clone();
        }
        if let Some(limit) = section.limit {
            universe = universe.limit(limit);
        }
        universe.validate().map_err(ConfigError::Universe)?;
        Ok(universe)
    }

    pub fn forest(&self) -> ForestConfig {
        ForestConfig {
            n_trees: self.learn.n_trees,
            max_depth: self.learn.max_depth,
            max_features: self.learn.max_features,
            seed: self.learn.seed,
            ..ForestConfig::default()
        }
    }
}
