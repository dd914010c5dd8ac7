//! Long-format price panel with lagging and leading returns.
//!
//! All symbols share one trading calendar: the union of every symbol's bar
//! dates. Each symbol's adjusted close is forward-filled over that calendar
//! (leading gaps stay empty), then every row looks `horizon` rows back and
//! forward within its symbol to get the past and future return.

use crate::data::provider::RawBar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Trading days in a year; the default look-back and look-ahead.
pub const DEFAULT_HORIZON: usize = 250;

/// One `(ticker, date)` row of the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub price: Option<f64>,
    pub prev_date: Option<NaiveDate>,
    pub prev_price: Option<f64>,
    pub prev_return: Option<f64>,
    pub next_date: Option<NaiveDate>,
    pub next_price: Option<f64>,
    pub next_return: Option<f64>,
}

/// Simple return from `from` to `to`; missing if either side is missing.
pub fn simple_return(from: Option<f64>, to: Option<f64>) -> Option<f64> {
    match (from, to) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() && a != 0.0 => Some(b / a - 1.0),
        _ => None,
    }
}

/// The panel: rows grouped by ticker (input order), dates ascending within each.
#[derive(Debug, Clone, Default)]
pub struct PricePanel {
    rows: Vec<PriceRow>,
    index: HashMap<(String, NaiveDate), usize>,
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    horizon: usize,
}

impl PricePanel {
    /// Rebuild a panel from rows that already carry their shifted fields
    /// (e.g. rows read back from CSV).
    pub fn from_rows(rows: Vec<PriceRow>, horizon: usize) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        let mut dates = BTreeSet::new();
        let mut tickers: Vec<String> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            index.insert((row.ticker.clone(), row.date), i);
            dates.insert(row.date);
            if tickers.last() != Some(&row.ticker) && !tickers.contains(&row.ticker) {
                tickers.push(row.ticker.clone());
            }
        }
        Self {
            rows,
            index,
            dates: dates.into_iter().collect(),
            tickers,
            horizon,
        }
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct trading dates, ascending.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn get(&self, ticker: &str, date: NaiveDate) -> Option<&PriceRow> {
        self.index
            .get(&(ticker.to_string(), date))
            .map(|&i| &self.rows[i])
    }

    /// Rows of one ticker, dates ascending.
    pub fn ticker_rows<'a>(&'a self, ticker: &'a str) -> impl Iterator<Item = &'a PriceRow> {
        self.rows.iter().filter(move |r| r.ticker == ticker)
    }
}

/// Build the panel from per-symbol bars.
///
/// `symbol_bars` order decides the row grouping order. Bars need not be
/// sorted; a repeated date keeps its last bar with a usable price.
pub fn build_panel(symbol_bars: &[(String, Vec<RawBar>)], horizon: usize) -> PricePanel {
    let calendar: Vec<NaiveDate> = symbol_bars
        .iter()
        .flat_map(|(_, bars)| bars.iter().map(|b| b.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows = Vec::with_capacity(calendar.len() * symbol_bars.len());

    for (symbol, bars) in symbol_bars {
        let by_date: HashMap<NaiveDate, f64> = bars
            .iter()
            .filter_map(|b| b.adjusted_price().map(|p| (b.date, p)))
            .collect();

        let mut last = None;
        let prices: Vec<Option<f64>> = calendar
            .iter()
            .map(|date| {
                if let Some(&price) = by_date.get(date) {
                    last = Some(price);
                }
                last
            })
            .collect();

        for (i, &date) in calendar.iter().enumerate() {
            let price = prices[i];
            let back = i.checked_sub(horizon);
            let ahead = Some(i + horizon).filter(|&j| j < calendar.len());

            let prev_price = back.and_then(|j| prices[j]);
            let next_price = ahead.and_then(|j| prices[j]);

            rows.push(PriceRow {
                date,
                ticker: symbol.clone(),
                price,
                prev_date: back.map(|j| calendar[j]),
                prev_price,
                prev_return: simple_return(prev_price, price),
                next_date: ahead.map(|j| calendar[j]),
                next_price,
                next_return: simple_return(price, next_price),
            });
        }
    }

    tracing::debug!(
        symbols = symbol_bars.len(),
        dates = calendar.len(),
        rows = rows.len(),
        "built price panel"
    );
    PricePanel::from_rows(rows, horizon)
}
