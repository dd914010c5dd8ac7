//! Price history loading for the panel.
//!
//! Reads every requested symbol's bars inside the history window from the
//! Parquet cache. Symbols without cached bars in the window (typically a
//! failed download) are reported and left out of the panel; only an entirely
//! empty result is an error.

use chrono::NaiveDate;
use nzxlab_core::data::{DataError, PriceCache, RawBar};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no cached price history for any of {requested} symbols")]
    NothingCached { requested: usize },

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

#[derive(Debug)]
pub struct LoadedPrices {
    /// Bars per symbol, in request order.
    pub bars: Vec<(String, Vec<RawBar>)>,
    /// Requested symbols that had no cached bars.
    pub missing: Vec<String>,
    /// BLAKE3 over every loaded bar.
    pub price_hash: String,
}

impl LoadedPrices {
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bars.iter().map(|(s, _)| s.as_str())
    }
}

pub fn load_price_history(
    cache: &PriceCache,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<LoadedPrices, LoadError> {
    let mut bars = Vec::with_capacity(symbols.len());
    let mut missing = Vec::new();

    for symbol in symbols {
        match cache.load_range(symbol, start, end) {
            Ok(loaded) if !loaded.is_empty() => bars.push((symbol.clone(), loaded)),
            Ok(_) | Err(DataError::NoCachedData { .. }) => {
                tracing::warn!(symbol = %symbol, "no cached price history; leaving it out");
                missing.push(symbol.clone());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if bars.is_empty() {
        return Err(LoadError::NothingCached {
            requested: symbols.len(),
        });
    }

    let price_hash = compute_price_hash(&bars);
    Ok(LoadedPrices {
        bars,
        missing,
        price_hash,
    })
}

/// Deterministic hash over symbols and bars in load order.
fn compute_price_hash(bars: &[(String, Vec<RawBar>)]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (symbol, series) in bars {
        hasher.update(symbol.as_bytes());
        for bar in series {
            hasher.update(bar.date.to_string().as_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
            hasher.update(&bar.volume.to_le_bytes());
            hasher.update(&bar.adj_close.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzxlab_core::data::DataSource;

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
            volume: 10,
            adj_close: close,
        }
    }

    #[test]
    fn loads_cached_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        cache
            .write(
                "AIR.NZ",
                &[bar(d(2024, 5, 1), 1.0), bar(d(2024, 5, 2), 1.1)],
                DataSource::Fixture,
                d(2024, 1, 1),
            )
            .unwrap();

        let loaded = load_price_history(
            &cache,
            &["AIR.NZ".to_string(), "GONE.NZ".to_string()],
            d(2024, 1, 1),
            d(2024, 6, 1),
        )
        .unwrap();
        assert_eq!(loaded.symbols().collect::<Vec<_>>(), vec!["AIR.NZ"]);
        assert_eq!(loaded.bars[0].1.len(), 2);
        assert_eq!(loaded.missing, vec!["GONE.NZ"]);
        assert_eq!(loaded.price_hash.len(), 64);
    }

    #[test]
    fn bars_outside_the_window_are_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        cache
            .write(
                "AIR.NZ",
                &[
                    bar(d(2000, 3, 1), 1.0),
                    bar(d(2014, 3, 3), 2.0),
                    bar(d(2024, 2, 29), 3.0),
                ],
                DataSource::Fixture,
                d(1970, 1, 1),
            )
            .unwrap();
        cache
            .write("OLD.NZ", &[bar(d(2001, 5, 1), 1.0)], DataSource::Fixture, d(1970, 1, 1))
            .unwrap();

        let symbols = ["AIR.NZ".to_string(), "OLD.NZ".to_string()];
        let window = load_price_history(&cache, &symbols, d(2014, 3, 1), d(2024, 3, 1)).unwrap();
        let dates: Vec<NaiveDate> = window.bars[0].1.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![d(2014, 3, 3), d(2024, 2, 29)]);
        assert_eq!(window.missing, vec!["OLD.NZ"]);

        let full = load_price_history(&cache, &symbols, d(1970, 1, 1), d(2024, 3, 1)).unwrap();
        assert_eq!(full.bars[0].1.len(), 3);
        assert_ne!(full.price_hash, window.price_hash);
    }

    #[test]
    fn empty_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path());
        assert!(matches!(
            load_price_history(&cache, &["AIR.NZ".to_string()], d(2024, 1, 1), d(2024, 6, 1)),
            Err(LoadError::NothingCached { requested: 1 })
        ));
    }
}
