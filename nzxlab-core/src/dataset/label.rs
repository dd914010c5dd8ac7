//! Join statements to the price panel and derive the BeatIndex label.

use super::{
    asof_backward, next_return_column, prev_return_column, DatasetError, DatasetRow,
    LabeledDataset, STAT_PREFIX,
};
use crate::data::statements::FundamentalsSet;
use crate::data::universe::Universe;
use crate::panel::PricePanel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOptions {
    /// Drop rows whose stock or benchmark forward return is unknown instead of
    /// labelling them `false`.
    pub drop_unlabeled: bool,
    /// Append each ticker's numeric valuation statistics as `Stat: ...` features.
    pub merge_valuation: bool,
}

/// Build the labeled dataset.
///
/// Statement rows whose date precedes all price history, whose ticker has no
/// price rows, or whose trade date is missing from an index are dropped. An
/// index without any panel rows is skipped as a feature, except the
/// benchmark, which is required.
pub fn build_dataset(
    fundamentals: &FundamentalsSet,
    panel: &PricePanel,
    universe: &Universe,
    opts: &LabelOptions,
) -> Result<LabeledDataset, DatasetError> {
    if fundamentals.statements.is_empty() {
        return Err(DatasetError::NoStatements);
    }
    if panel.is_empty() {
        return Err(DatasetError::EmptyPanel);
    }
    let benchmark = universe.benchmark.as_str();
    if panel.ticker_rows(benchmark).next().is_none() {
        return Err(DatasetError::MissingBenchmark {
            symbol: benchmark.to_string(),
        });
    }

    let horizon = panel.horizon();
    let trade_dates: HashMap<NaiveDate, NaiveDate> =
        asof_backward(&fundamentals.dates(), panel.dates())
            .into_iter()
            .filter_map(|(date, trade)| trade.map(|t| (date, t)))
            .collect();

    let context: Vec<&str> = universe
        .context_indices()
        .filter(|idx| {
            let present = panel.ticker_rows(idx).next().is_some();
            if !present {
                tracing::warn!(index = *idx, "index has no price rows; skipping its feature");
            }
            present
        })
        .collect();

    let statement_columns = fundamentals.columns();
    let (stat_columns, stats) = if opts.merge_valuation {
        valuation_features(fundamentals)
    } else {
        (Vec::new(), HashMap::new())
    };

    let mut feature_names = statement_columns.clone();
    feature_names.extend(stat_columns.iter().cloned());
    feature_names.extend(
        context
            .iter()
            .map(|idx| format!("{}{idx}", prev_return_column(horizon))),
    );

    let mut rows = Vec::new();
    let mut unmatched = 0usize;
    let mut unlabeled = 0usize;

    for statement in &fundamentals.statements {
        let Some(&trade_date) = trade_dates.get(&statement.date) else {
            unmatched += 1;
            continue;
        };
        let (Some(stock), Some(bench)) = (
            panel.get(&statement.ticker, trade_date),
            panel.get(benchmark, trade_date),
        ) else {
            unmatched += 1;
            continue;
        };
        let Some(index_returns) = context
            .iter()
            .map(|idx| panel.get(idx, trade_date).map(|r| r.prev_return))
            .collect::<Option<Vec<_>>>()
        else {
            unmatched += 1;
            continue;
        };

        if opts.drop_unlabeled && (stock.next_return.is_none() || bench.next_return.is_none()) {
            unlabeled += 1;
            continue;
        }

        let beat_index = match (stock.next_return, bench.next_return) {
            (Some(own), Some(index)) => own > index,
            _ => false,
        };

        let ticker_stats = stats.get(statement.ticker.as_str());
        let features = statement_columns
            .iter()
            .map(|col| statement.get(col))
            .chain(
                stat_columns
                    .iter()
                    .map(|col| ticker_stats.and_then(|s| s.get(col).copied())),
            )
            .chain(index_returns)
            .map(clean)
            .collect();

        rows.push(DatasetRow {
            ticker: statement.ticker.clone(),
            date: statement.date,
            trade_date,
            next_return: clean(stock.next_return),
            benchmark_next_return: clean(bench.next_return),
            beat_index,
            features,
        });
    }

    tracing::info!(
        rows = rows.len(),
        features = feature_names.len(),
        unmatched,
        unlabeled,
        "built labeled dataset"
    );

    Ok(LabeledDataset {
        horizon,
        benchmark: benchmark.to_string(),
        feature_names,
        rows,
    })
}

/// Missing and non-finite values become 0.
fn clean(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

type TickerStats<'a> = HashMap<&'a str, HashMap<String, f64>>;

/// Numeric valuation statistics as feature columns, in first-appearance order.
fn valuation_features(fundamentals: &FundamentalsSet) -> (Vec<String>, TickerStats<'_>) {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    let mut by_ticker: TickerStats<'_> = HashMap::new();

    for stat in &fundamentals.valuation {
        let Some(raw) = stat.raw else { continue };
        let column = format!("{STAT_PREFIX}{}", stat.valuation);
        if seen.insert(column.clone()) {
            columns.push(column.clone());
        }
        by_ticker
            .entry(stat.ticker.as_str())
            .or_default()
            .entry(column)
            .or_insert(raw);
    }
    (columns, by_ticker)
}
