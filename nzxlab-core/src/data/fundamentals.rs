//! Fundamentals providers: financial statements and valuation statistics.
//!
//! The Yahoo implementation reads statements from the fundamentals time-series
//! endpoint (one request per statement) and valuation statistics from the
//! quote summary endpoint, which needs the cookie/crumb pair held by
//! [`YahooClient`].

use super::provider::DataError;
use super::statements::{
    combine_statements, StatementKind, StatementPeriod, StatementRow, ValuationStat,
};
use super::yahoo::YahooClient;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait for fundamentals sources.
pub trait FundamentalsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Rows of one statement for one symbol, oldest first.
    fn statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        period: StatementPeriod,
    ) -> Result<Vec<StatementRow>, DataError>;

    /// Latest valuation statistics for one symbol.
    fn valuation_stats(&self, symbol: &str) -> Result<Vec<ValuationStat>, DataError>;

    fn is_available(&self) -> bool;
}

/// Fetch the three statements of a symbol and outer-merge them on date.
pub fn fetch_three_statements(
    provider: &dyn FundamentalsProvider,
    symbol: &str,
    period: StatementPeriod,
) -> Result<Vec<StatementRow>, DataError> {
    let income = provider.statement(symbol, StatementKind::IncomeStatement, period)?;
    let balance = provider.statement(symbol, StatementKind::BalanceSheet, period)?;
    let cash_flow = provider.statement(symbol, StatementKind::CashFlow, period)?;
    Ok(combine_statements(symbol, &income, &balance, &cash_flow))
}

/// Yahoo time-series keys requested for each statement.
///
/// The lists are disjoint so the outer merge never has to resolve a clash.
pub fn statement_fields(kind: StatementKind) -> &'static [&'static str] {
    match kind {
        StatementKind::IncomeStatement => &[
            "TotalRevenue",
            "CostOfRevenue",
            "GrossProfit",
            "OperatingExpense",
            "OperatingIncome",
            "NetNonOperatingInterestIncomeExpense",
            "InterestExpense",
            "PretaxIncome",
            "TaxProvision",
            "NetIncomeCommonStockholders",
            "NetIncome",
            "BasicEPS",
            "DilutedEPS",
            "BasicAverageShares",
            "DilutedAverageShares",
            "TotalExpenses",
            "EBIT",
            "EBITDA",
        ],
        StatementKind::BalanceSheet => &[
            "TotalAssets",
            "CurrentAssets",
            "CashAndCashEquivalents",
            "Inventory",
            "TotalNonCurrentAssets",
            "NetPPE",
            "Goodwill",
            "TotalLiabilitiesNetMinorityInterest",
            "CurrentLiabilities",
            "LongTermDebt",
            "TotalDebt",
            "NetDebt",
            "StockholdersEquity",
            "RetainedEarnings",
            "WorkingCapital",
            "TangibleBookValue",
            "ShareIssued",
            "OrdinarySharesNumber",
        ],
        StatementKind::CashFlow => &[
            "OperatingCashFlow",
            "InvestingCashFlow",
            "FinancingCashFlow",
            "FreeCashFlow",
            "CapitalExpenditure",
            "CashDividendsPaid",
            "DepreciationAndAmortization",
            "StockBasedCompensation",
            "IssuanceOfDebt",
            "RepaymentOfDebt",
            "ChangesInCash",
            "EndCashPosition",
        ],
    }
}

/// Turn a CamelCase key into a spaced label: `DilutedEPS` → `Diluted EPS`.
pub fn display_label(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            {
                out.push(' ');
            }
        }
        if i == 0 {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Key statistics page wording for quoteSummary keys.
const VALUATION_LABELS: &[(&str, &str)] = &[
    ("marketCap", "Market Cap (intraday)"),
    ("enterpriseValue", "Enterprise Value"),
    ("trailingPE", "Trailing P/E"),
    ("forwardPE", "Forward P/E"),
    ("pegRatio", "PEG Ratio (5 yr expected)"),
    ("priceToSalesTrailing12Months", "Price/Sales (ttm)"),
    ("priceToBook", "Price/Book (mrq)"),
    ("enterpriseToRevenue", "Enterprise Value/Revenue"),
    ("enterpriseToEbitda", "Enterprise Value/EBITDA"),
    ("beta", "Beta (5Y Monthly)"),
    ("fiftyTwoWeekHigh", "52 Week High"),
    ("fiftyTwoWeekLow", "52 Week Low"),
    ("fiftyDayAverage", "50-Day Moving Average"),
    ("twoHundredDayAverage", "200-Day Moving Average"),
    ("averageVolume", "Avg Vol (3 month)"),
    ("averageVolume10days", "Avg Vol (10 day)"),
    ("sharesOutstanding", "Shares Outstanding"),
    ("floatShares", "Float"),
    ("heldPercentInsiders", "% Held by Insiders"),
    ("heldPercentInstitutions", "% Held by Institutions"),
    ("sharesShort", "Shares Short"),
    ("shortRatio", "Short Ratio"),
    ("dividendRate", "Forward Annual Dividend Rate"),
    ("dividendYield", "Forward Annual Dividend Yield"),
    ("trailingAnnualDividendRate", "Trailing Annual Dividend Rate"),
    ("trailingAnnualDividendYield", "Trailing Annual Dividend Yield"),
    ("fiveYearAvgDividendYield", "5 Year Average Dividend Yield"),
    ("payoutRatio", "Payout Ratio"),
    ("profitMargins", "Profit Margin"),
    ("operatingMargins", "Operating Margin (ttm)"),
    ("returnOnAssets", "Return on Assets (ttm)"),
    ("returnOnEquity", "Return on Equity (ttm)"),
    ("totalRevenue", "Revenue (ttm)"),
    ("revenuePerShare", "Revenue Per Share (ttm)"),
    ("revenueGrowth", "Quarterly Revenue Growth (yoy)"),
    ("grossProfits", "Gross Profit (ttm)"),
    ("ebitda", "EBITDA"),
    ("trailingEps", "Diluted EPS (ttm)"),
    ("earningsQuarterlyGrowth", "Quarterly Earnings Growth (yoy)"),
    ("totalCash", "Total Cash (mrq)"),
    ("totalCashPerShare", "Total Cash Per Share (mrq)"),
    ("totalDebt", "Total Debt (mrq)"),
    ("debtToEquity", "Total Debt/Equity (mrq)"),
    ("currentRatio", "Current Ratio (mrq)"),
    ("bookValue", "Book Value Per Share (mrq)"),
    ("operatingCashflow", "Operating Cash Flow (ttm)"),
    ("freeCashflow", "Levered Free Cash Flow (ttm)"),
];

/// Label of a valuation statistic; keys without a known wording are spaced
/// with [`display_label`].
pub fn valuation_label(key: &str) -> String {
    VALUATION_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| display_label(key))
}

fn period_prefix(period: StatementPeriod) -> &'static str {
    match period {
        StatementPeriod::Annual => "annual",
        StatementPeriod::Quarterly => "quarterly",
    }
}

// ── Yahoo response shapes ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TimeseriesResponse {
    timeseries: TimeseriesResult,
}

#[derive(Debug, Deserialize)]
struct TimeseriesResult {
    result: Option<Vec<Value>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeseriesEntry {
    as_of_date: String,
    period_type: Option<String>,
    reported_value: Option<ReportedValue>,
}

#[derive(Debug, Deserialize)]
struct ReportedValue {
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummaryResult,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResult {
    result: Option<Vec<BTreeMap<String, Value>>>,
    error: Option<Value>,
}

const SUMMARY_MODULES: [&str; 3] = ["defaultKeyStatistics", "summaryDetail", "financialData"];

/// Yahoo Finance fundamentals provider.
pub struct YahooFundamentalsProvider {
    http: Arc<YahooClient>,
}

impl YahooFundamentalsProvider {
    pub fn new(http: Arc<YahooClient>) -> Self {
        Self { http }
    }

    fn timeseries_url(symbol: &str, kind: StatementKind, period: StatementPeriod) -> String {
        let prefix = period_prefix(period);
        let types: Vec<String> = statement_fields(kind)
            .iter()
            .map(|f| format!("{prefix}{f}"))
            .collect();
        let now = chrono::Utc::now().timestamp();
        format!(
            "https://query2.finance.yahoo.com/ws/fundamentals-timeseries/v1/finance/timeseries/{symbol}\
             ?symbol={symbol}&type={}&period1=493590046&period2={now}",
            types.join(",")
        )
    }

    /// Parse a time-series response into one row per reporting date.
    ///
    /// Trailing-twelve-month entries are dropped; only dated periods survive.
    fn parse_timeseries(
        symbol: &str,
        period: StatementPeriod,
        resp: TimeseriesResponse,
    ) -> Result<Vec<StatementRow>, DataError> {
        if let Some(err) = resp.timeseries.error.filter(|e| !e.is_null()) {
            return Err(DataError::ResponseFormatChanged(err.to_string()));
        }
        let results = resp
            .timeseries
            .result
            .ok_or_else(|| DataError::ResponseFormatChanged("timeseries result missing".into()))?;

        let prefix = period_prefix(period);
        let mut by_date: BTreeMap<NaiveDate, StatementRow> = BTreeMap::new();

        for series in results {
            let Some(key) = series
                .pointer("/meta/type/0")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let Some(entries) = series.get(&key).and_then(Value::as_array) else {
                continue;
            };
            let label = display_label(key.strip_prefix(prefix).unwrap_or(&key));

            for entry in entries.iter().filter(|e| !e.is_null()) {
                let entry: TimeseriesEntry = serde_json::from_value(entry.clone()).map_err(|e| {
                    DataError::ResponseFormatChanged(format!("timeseries entry for {symbol}: {e}"))
                })?;
                if entry
                    .period_type
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case("TTM"))
                {
                    continue;
                }
                let Ok(date) = NaiveDate::parse_from_str(&entry.as_of_date, "%Y-%m-%d") else {
                    tracing::debug!(symbol, as_of = %entry.as_of_date, "skipping undated period");
                    continue;
                };
                by_date
                    .entry(date)
                    .or_insert_with(|| StatementRow::new(symbol, date))
                    .insert(&label, entry.reported_value.and_then(|v| v.raw));
            }
        }

        // Keep the requested field order inside every row regardless of
        // the order Yahoo returned the series in.
        let mut rows: Vec<StatementRow> = by_date.into_values().collect();
        for row in &mut rows {
            row.order
                .sort_by_key(|name| row_rank(name).unwrap_or(usize::MAX));
        }
        Ok(rows)
    }

    fn parse_quote_summary(
        symbol: &str,
        resp: QuoteSummaryResponse,
    ) -> Result<Vec<ValuationStat>, DataError> {
        if let Some(err) = resp.quote_summary.error.filter(|e| !e.is_null()) {
            let code = err.get("code").and_then(Value::as_str).unwrap_or_default();
            if code == "Not Found" {
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            return Err(DataError::ResponseFormatChanged(err.to_string()));
        }
        let modules = resp
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| DataError::ResponseFormatChanged("quote summary result missing".into()))?;

        let mut stats = Vec::new();
        for module in SUMMARY_MODULES {
            let Some(fields) = modules.get(module).and_then(Value::as_object) else {
                continue;
            };
            for (key, value) in fields {
                // Scalars (maxAge, currency codes) are not valuation figures.
                let Some(obj) = value.as_object() else {
                    continue;
                };
                let raw = obj.get("raw").and_then(Value::as_f64);
                let current = obj
                    .get("fmt")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| raw.map(|r| r.to_string()))
                    .unwrap_or_else(|| "-".to_string());
                stats.push(ValuationStat {
                    ticker: symbol.to_string(),
                    valuation: valuation_label(key),
                    current,
                    raw,
                });
            }
        }
        Ok(stats)
    }
}

/// Position of a display label across all statement field lists.
fn row_rank(label: &str) -> Option<usize> {
    StatementKind::ALL
        .iter()
        .flat_map(|k| statement_fields(*k).iter())
        .position(|f| display_label(f) == label)
}

impl FundamentalsProvider for YahooFundamentalsProvider {
    fn name(&self) -> &str {
        "yahoo_fundamentals"
    }

    fn statement(
        &self,
        symbol: &str,
        kind: StatementKind,
        period: StatementPeriod,
    ) -> Result<Vec<StatementRow>, DataError> {
        let url = Self::timeseries_url(symbol, kind, period);
        let resp: TimeseriesResponse = self.http.get_json(&url, symbol)?;
        let rows = Self::parse_timeseries(symbol, period, resp)?;
        tracing::debug!(symbol, statement = kind.label(), periods = rows.len(), "fetched statement");
        Ok(rows)
    }

    fn valuation_stats(&self, symbol: &str) -> Result<Vec<ValuationStat>, DataError> {
        let crumb = self.http.crumb()?;
        let base = format!("https://query2.finance.yahoo.com/v10/finance/quoteSummary/{symbol}");
        let url = reqwest::Url::parse_with_params(
            &base,
            &[("modules", SUMMARY_MODULES.join(",")), ("crumb", crumb)],
        )
        .map_err(|e| DataError::Other(format!("bad quote summary URL: {e}")))?;
        let resp: QuoteSummaryResponse = self.http.get_json(url.as_str(), symbol)?;
        Self::parse_quote_summary(symbol, resp)
    }

    fn is_available(&self) -> bool {
        self.http.circuit_breaker().is_allowed()
    }
}
