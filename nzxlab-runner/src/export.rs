//! CSV persistence for the pipeline files.
//!
//! Three files link the stages:
//! - **prices**: the long price panel, one row per `(date, ticker)`
//! - **dataset**: labeled statement rows, the learner's input
//! - **valuation**: raw valuation statistics per ticker
//!
//! Dates are `%d/%m/%Y` and missing values are empty cells. The readers infer
//! the horizon and benchmark from the header so a later stage can start from
//! files alone.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use nzxlab_core::data::ValuationStat;
use nzxlab_core::dataset::{
    next_return_column, prev_return_column, DatasetRow, LabeledDataset, DATE_COLUMN,
    LABEL_COLUMN, TICKER_COLUMN, TRADE_DATE_COLUMN,
};
use nzxlab_core::panel::{PricePanel, PriceRow};

pub const DATE_FORMAT: &str = "%d/%m/%Y";

// ─── Cell helpers ───────────────────────────────────────────────────

fn date_cell(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

fn float_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => String::new(),
    }
}

fn parse_date(cell: &str) -> Result<Option<NaiveDate>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(cell, DATE_FORMAT)
        .map(Some)
        .with_context(|| format!("invalid date '{cell}'"))
}

fn require_date(cell: &str, column: &str) -> Result<NaiveDate> {
    parse_date(cell)?.with_context(|| format!("missing {column}"))
}

/// Empty cells, `-` and `nan` are missing.
fn parse_float(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell == "-" || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .with_context(|| format!("invalid number '{cell}'"))
}

fn parse_bool(cell: &str) -> Result<bool> {
    match cell.trim() {
        "True" | "true" | "1" => Ok(true),
        "False" | "false" | "0" => Ok(false),
        other => bail!("invalid {LABEL_COLUMN} value '{other}'"),
    }
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

// ─── Prices ─────────────────────────────────────────────────────────

/// `Date,Ticker,Price,Prev250day,Prev250dayPrice,Prev250dayReturn,Next250day,...`
pub fn prices_header(horizon: usize) -> Vec<String> {
    vec![
        DATE_COLUMN.to_string(),
        TICKER_COLUMN.to_string(),
        "Price".to_string(),
        format!("Prev{horizon}day"),
        format!("Prev{horizon}dayPrice"),
        prev_return_column(horizon),
        format!("Next{horizon}day"),
        format!("Next{horizon}dayPrice"),
        next_return_column(horizon),
    ]
}

pub fn write_prices_csv<W: Write>(panel: &PricePanel, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(prices_header(panel.horizon()))?;
    for row in panel.rows() {
        wtr.write_record([
            date_cell(Some(row.date)),
            row.ticker.clone(),
            float_cell(row.price),
            date_cell(row.prev_date),
            float_cell(row.prev_price),
            float_cell(row.prev_return),
            date_cell(row.next_date),
            float_cell(row.next_price),
            float_cell(row.next_return),
        ])?;
    }
    wtr.flush().context("failed to flush prices CSV")?;
    Ok(())
}

/// `Prev250day` → 250.
fn horizon_from_prices_header(header: &csv::StringRecord) -> Result<usize> {
    let column = header.get(3).unwrap_or_default();
    column
        .strip_prefix("Prev")
        .and_then(|rest| rest.strip_suffix("day"))
        .and_then(|h| h.parse().ok())
        .with_context(|| format!("not a prices file: unexpected column '{column}'"))
}

pub fn read_prices_csv<R: Read>(reader: R) -> Result<PricePanel> {
    let mut rdr = csv::Reader::from_reader(reader);
    let header = rdr.headers().context("failed to read prices header")?.clone();
    if header.len() != 9 {
        bail!("not a prices file: expected 9 columns, found {}", header.len());
    }
    let horizon = horizon_from_prices_header(&header)?;

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("prices row {}", i + 1))?;
        let row = (|| -> Result<PriceRow> {
            Ok(PriceRow {
                date: require_date(&record[0], DATE_COLUMN)?,
                ticker: record[1].to_string(),
                price: parse_float(&record[2])?,
                prev_date: parse_date(&record[3])?,
                prev_price: parse_float(&record[4])?,
                prev_return: parse_float(&record[5])?,
                next_date: parse_date(&record[6])?,
                next_price: parse_float(&record[7])?,
                next_return: parse_float(&record[8])?,
            })
        })()
        .with_context(|| format!("prices row {}", i + 1))?;
        rows.push(row);
    }
    Ok(PricePanel::from_rows(rows, horizon))
}

pub fn save_prices_csv(panel: &PricePanel, path: &Path) -> Result<()> {
    write_prices_csv(panel, create_file(path)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = panel.len(), "wrote prices");
    Ok(())
}

pub fn load_prices_csv(path: &Path) -> Result<PricePanel> {
    read_prices_csv(open_file(path)?).with_context(|| format!("failed to read {}", path.display()))
}

// ─── Dataset ────────────────────────────────────────────────────────

pub fn write_dataset_csv<W: Write>(dataset: &LabeledDataset, writer: W) -> Result<()> {
    dataset.validate()?;
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(dataset.header())?;
    for row in &dataset.rows {
        let mut record = vec![
            row.ticker.clone(),
            date_cell(Some(row.date)),
            date_cell(Some(row.trade_date)),
            row.next_return.to_string(),
            row.benchmark_next_return.to_string(),
            if row.beat_index { "True" } else { "False" }.to_string(),
        ];
        record.extend(row.features.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush().context("failed to flush dataset CSV")?;
    Ok(())
}

/// Horizon and benchmark from `Next250dayReturn` and `Next250dayReturn^NZ50`.
fn dataset_shape(header: &csv::StringRecord) -> Result<(usize, String)> {
    let fixed = [TICKER_COLUMN, DATE_COLUMN, TRADE_DATE_COLUMN];
    if header.len() < 6 || fixed.iter().enumerate().any(|(i, c)| &header[i] != *c) {
        bail!("not a dataset file: header starts {:?}", header.iter().take(3).collect::<Vec<_>>());
    }
    if &header[5] != LABEL_COLUMN {
        bail!("not a dataset file: expected {LABEL_COLUMN}, found '{}'", &header[5]);
    }

    let next = &header[3];
    let horizon: usize = next
        .strip_prefix("Next")
        .and_then(|rest| rest.strip_suffix("dayReturn"))
        .and_then(|h| h.parse().ok())
        .with_context(|| format!("not a dataset file: unexpected column '{next}'"))?;
    let benchmark = header[4]
        .strip_prefix(next)
        .filter(|b| !b.is_empty())
        .with_context(|| format!("no benchmark in column '{}'", &header[4]))?
        .to_string();
    Ok((horizon, benchmark))
}

pub fn read_dataset_csv<R: Read>(reader: R) -> Result<LabeledDataset> {
    let mut rdr = csv::Reader::from_reader(reader);
    let header = rdr.headers().context("failed to read dataset header")?.clone();
    let (horizon, benchmark) = dataset_shape(&header)?;
    let feature_names: Vec<String> = header.iter().skip(6).map(str::to_string).collect();

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("dataset row {}", i + 1))?;
        let row = (|| -> Result<DatasetRow> {
            let features = record
                .iter()
                .skip(6)
                .map(|cell| Ok(parse_float(cell)?.unwrap_or(0.0)))
                .collect::<Result<Vec<f64>>>()?;
            Ok(DatasetRow {
                ticker: record[0].to_string(),
                date: require_date(&record[1], DATE_COLUMN)?,
                trade_date: require_date(&record[2], TRADE_DATE_COLUMN)?,
                next_return: parse_float(&record[3])?.unwrap_or(0.0),
                benchmark_next_return: parse_float(&record[4])?.unwrap_or(0.0),
                beat_index: parse_bool(&record[5])?,
                features,
            })
        })()
        .with_context(|| format!("dataset row {}", i + 1))?;
        rows.push(row);
    }

    let dataset = LabeledDataset {
        horizon,
        benchmark,
        feature_names,
        rows,
    };
    dataset.validate()?;
    Ok(dataset)
}

pub fn save_dataset_csv(dataset: &LabeledDataset, path: &Path) -> Result<()> {
    write_dataset_csv(dataset, create_file(path)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        rows = dataset.len(),
        features = dataset.feature_names.len(),
        "wrote dataset"
    );
    Ok(())
}

pub fn load_dataset_csv(path: &Path) -> Result<LabeledDataset> {
    read_dataset_csv(open_file(path)?)
        .with_context(|| format!("failed to read {}", path.display()))
}

// ─── Valuation ──────────────────────────────────────────────────────

pub fn write_valuation_csv<W: Write>(stats: &[ValuationStat], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Ticker", "Valuation", "Current"])?;
    for s in stats {
        wtr.write_record([&s.ticker, &s.valuation, &s.current])?;
    }
    wtr.flush().context("failed to flush valuation CSV")?;
    Ok(())
}

pub fn save_valuation_csv(stats: &[ValuationStat], path: &Path) -> Result<()> {
    write_valuation_csv(stats, create_file(path)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), stats = stats.len(), "wrote valuation stats");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzxlab_core::data::RawBar;
    use nzxlab_core::panel::build_panel;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, day).unwrap()
    }

    fn bar(day: u32, price: f64) -> RawBar {
        RawBar {
            date: d(day),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1,
            adj_close: price,
        }
    }

    #[test]
    fn prices_header_follows_horizon() {
        assert_eq!(
            prices_header(250).join(","),
            "Date,Ticker,Price,Prev250day,Prev250dayPrice,Prev250dayReturn,\
             Next250day,Next250dayPrice,Next250dayReturn"
        );
    }

    #[test]
    fn prices_rows_use_day_first_dates_and_empty_cells() {
        let panel = build_panel(
            &[("AIR.NZ".to_string(), vec![bar(1, 2.0), bar(2, 2.5)])],
            1,
        );
        let mut out = Vec::new();
        write_prices_csv(&panel, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "01/03/2023,AIR.NZ,2,,,,02/03/2023,2.5,0.25");
        assert_eq!(lines[2], "02/03/2023,AIR.NZ,2.5,01/03/2023,2,0.25,,,");
    }

    #[test]
    fn prices_reader_rebuilds_panel() {
        let panel = build_panel(
            &[
                ("AIR.NZ".to_string(), vec![bar(1, 2.0), bar(3, 2.2), bar(6, 2.4)]),
                ("^NZ50".to_string(), vec![bar(1, 100.0), bar(2, 101.0), bar(6, 99.0)]),
            ],
            2,
        );
        let mut out = Vec::new();
        write_prices_csv(&panel, &mut out).unwrap();
        let back = read_prices_csv(out.as_slice()).unwrap();

        assert_eq!(back.horizon(), 2);
        assert_eq!(back.rows(), panel.rows());
        assert_eq!(back.dates(), panel.dates());
        assert_eq!(back.get("AIR.NZ", d(2)).unwrap().price, Some(2.0));
    }

    #[test]
    fn prices_reader_rejects_other_files() {
        let err = read_prices_csv("Ticker,Valuation,Current\nAIR,Beta,1\n".as_bytes());
        assert!(err.is_err());
    }

    fn dataset() -> LabeledDataset {
        LabeledDataset {
            horizon: 250,
            benchmark: "^NZ50".into(),
            feature_names: vec!["Total Revenue".into(), "Prev250dayReturn^GSPC".into()],
            rows: vec![
                DatasetRow {
                    ticker: "AIR.NZ".into(),
                    date: d(31),
                    trade_date: d(31),
                    next_return: 0.125,
                    benchmark_next_return: 0.05,
                    beat_index: true,
                    features: vec![5_900_000_000.0, -0.031],
                },
                DatasetRow {
                    ticker: "FPH.NZ".into(),
                    date: d(26),
                    trade_date: d(24),
                    next_return: 0.0,
                    benchmark_next_return: 0.05,
                    beat_index: false,
                    features: vec![0.0, 0.0],
                },
            ],
        }
    }

    #[test]
    fn dataset_layout() {
        let mut out = Vec::new();
        write_dataset_csv(&dataset(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Ticker,Date,Trade Date,Next250dayReturn,Next250dayReturn^NZ50,BeatIndex,\
             Total Revenue,Prev250dayReturn^GSPC"
        );
        assert_eq!(lines[1], "AIR.NZ,31/03/2023,31/03/2023,0.125,0.05,True,5900000000,-0.031");
        assert!(lines[2].contains(",False,"));
    }

    #[test]
    fn dataset_reader_infers_horizon_and_benchmark() {
        let mut out = Vec::new();
        write_dataset_csv(&dataset(), &mut out).unwrap();
        let back = read_dataset_csv(out.as_slice()).unwrap();
        assert_eq!(back, dataset());
        assert_eq!(back.benchmark_column(), "Next250dayReturn^NZ50");
    }

    #[test]
    fn dataset_reader_treats_dashes_as_zero() {
        let text = "Ticker,Date,Trade Date,Next20dayReturn,Next20dayReturn^NZ50,BeatIndex,EBIT\n\
                    AIR.NZ,31/03/2023,31/03/2023,0.1,0.2,False,-\n";
        let back = read_dataset_csv(text.as_bytes()).unwrap();
        assert_eq!(back.horizon, 20);
        assert_eq!(back.rows[0].features, vec![0.0]);
    }

    #[test]
    fn dataset_reader_rejects_bad_label() {
        let text = "Ticker,Date,Trade Date,Next20dayReturn,Next20dayReturn^NZ50,BeatIndex\n\
                    AIR.NZ,31/03/2023,31/03/2023,0.1,0.2,maybe\n";
        assert!(read_dataset_csv(text.as_bytes()).is_err());
    }

    #[test]
    fn valuation_csv() {
        let stats = vec![ValuationStat {
            ticker: "AIR.NZ".into(),
            valuation: "Trailing P/E".into(),
            current: "14.25".into(),
            raw: Some(14.25),
        }];
        let mut out = Vec::new();
        write_valuation_csv(&stats, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Ticker,Valuation,Current\nAIR.NZ,Trailing P/E,14.25\n"
        );
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/_three_statements.csv");
        save_dataset_csv(&dataset(), &path).unwrap();
        assert_eq!(load_dataset_csv(&path).unwrap(), dataset());
    }
}
