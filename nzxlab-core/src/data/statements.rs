//! Financial statement rows and valuation statistics.
//!
//! A statement row is one reporting period of one ticker: a date plus a bag of
//! named numeric line items. Income statement, balance sheet, and cash flow are
//! fetched separately and merged per ticker on the period date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Which of the three statements a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::IncomeStatement,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::IncomeStatement => "income statement",
            StatementKind::BalanceSheet => "balance sheet",
            StatementKind::CashFlow => "cash flow",
        }
    }
}

/// Reporting frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementPeriod {
    #[default]
    Annual,
    Quarterly,
}

/// One reporting period of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    pub ticker: String,
    pub date: NaiveDate,
    /// Line item → value. `None` marks an item Yahoo lists without a value.
    pub values: BTreeMap<String, Option<f64>>,
    /// Line item names in the order they were first added.
    #[serde(default)]
    pub order: Vec<String>,
}

impl StatementRow {
    pub fn new(ticker: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            date,
            values: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert a line item; the first value for a name wins.
    pub fn insert(&mut self, name: &str, value: Option<f64>) {
        if self.values.contains_key(name) {
            return;
        }
        self.values.insert(name.to_string(), value);
        self.order.push(name.to_string());
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    /// Line item names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }
}

/// One valuation statistic of one ticker ("Trailing P/E" → "14.25").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationStat {
    pub ticker: String,
    pub valuation: String,
    pub current: String,
    pub raw: Option<f64>,
}

/// Outer-merge the three statements of a single ticker on the period date.
///
/// Every date that appears in any statement yields one row; line items a
/// statement does not report for that date are simply absent. When two
/// statements carry the same line item name the earlier statement wins.
pub fn combine_statements(
    ticker: &str,
    income: &[StatementRow],
    balance: &[StatementRow],
    cash_flow: &[StatementRow],
) -> Vec<StatementRow> {
    let mut by_date: BTreeMap<NaiveDate, StatementRow> = BTreeMap::new();

    for statement in [income, balance, cash_flow] {
        for row in statement {
            let merged = by_date
                .entry(row.date)
                .or_insert_with(|| StatementRow::new(ticker, row.date));
            for name in row.columns() {
                if merged.values.contains_key(name) {
                    tracing::debug!(ticker, column = name, "duplicate line item; keeping first");
                }
                merged.insert(name, row.values.get(name).copied().flatten());
            }
        }
    }

    by_date.into_values().collect()
}

/// All fundamentals gathered for a universe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalsSet {
    pub statements: Vec<StatementRow>,
    pub valuation: Vec<ValuationStat>,
}

impl FundamentalsSet {
    /// Union of statement line items, in order of first appearance.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in &self.statements {
            for name in row.columns() {
                if seen.insert(name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// Distinct statement dates, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.statements.iter().map(|r| r.date).collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, items: &[(&str, Option<f64>)]) -> StatementRow {
        let mut r = StatementRow::new("AIR.NZ", date);
        for (name, v) in items {
            r.insert(name, *v);
        }
        r
    }

    #[test]
    fn outer_merge_keeps_every_date() {
        let income = vec![row(d(2023, 6, 30), &[("Total Revenue", Some(10.0))])];
        let balance = vec![
            row(d(2022, 6, 30), &[("Total Assets", Some(50.0))]),
            row(d(2023, 6, 30), &[("Total Assets", Some(55.0))]),
        ];
        let cash = vec![row(d(2023, 6, 30), &[("Free Cash Flow", None)])];

        let merged = combine_statements("AIR.NZ", &income, &balance, &cash);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].date, d(2022, 6, 30));
        assert_eq!(merged[0].get("Total Revenue"), None);
        assert_eq!(merged[1].get("Total Revenue"), Some(10.0));
        assert_eq!(merged[1].get("Total Assets"), Some(55.0));
        assert!(merged[1].values.contains_key("Free Cash Flow"));
        assert_eq!(
            merged[1].columns().collect::<Vec<_>>(),
            vec!["Total Revenue", "Total Assets", "Free Cash Flow"]
        );
    }

    #[test]
    fn first_statement_wins_on_collision() {
        let income = vec![row(d(2023, 6, 30), &[("Net Income", Some(1.0))])];
        let cash = vec![row(d(2023, 6, 30), &[("Net Income", Some(2.0))])];
        let merged = combine_statements("AIR.NZ", &income, &[], &cash);
        assert_eq!(merged[0].get("Net Income"), Some(1.0));
    }

    #[test]
    fn set_columns_follow_first_appearance() {
        let set = FundamentalsSet {
            statements: vec![
                row(d(2022, 6, 30), &[("B", Some(1.0)), ("A", Some(1.0))]),
                row(d(2023, 6, 30), &[("A", Some(1.0)), ("C", None)]),
            ],
            valuation: Vec::new(),
        };
        assert_eq!(set.columns(), vec!["B", "A", "C"]);
        assert_eq!(set.dates(), vec![d(2022, 6, 30), d(2023, 6, 30)]);
    }
}
