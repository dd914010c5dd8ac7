//! Property tests for the panel and the as-of join.
//!
//! Uses proptest to verify:
//! 1. As-of matches never look forward and are the latest eligible date
//! 2. Panel rows cover every (symbol, date) pair exactly once
//! 3. Shifted fields agree across rows: row i's next is row i+h's price
//! 4. Forward fill never invents a price before a symbol's first bar

use chrono::{Duration, NaiveDate};
use nzxlab_core::data::RawBar;
use nzxlab_core::dataset::asof_backward;
use nzxlab_core::panel::build_panel;
use proptest::prelude::*;

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_dates(max: usize) -> impl Strategy<Value = Vec<NaiveDate>> {
    prop::collection::vec(0i64..400, 0..max)
        .prop_map(|offsets| offsets.into_iter().map(|o| base() + Duration::days(o)).collect())
}

fn arb_series() -> impl Strategy<Value = Vec<(i64, Option<f64>)>> {
    prop::collection::vec((0i64..60, prop::option::weighted(0.9, 1.0..100.0_f64)), 1..40)
}

fn to_bars(series: &[(i64, Option<f64>)]) -> Vec<RawBar> {
    series
        .iter()
        .map(|&(offset, price)| {
            let p = price.unwrap_or(f64::NAN);
            RawBar {
                date: base() + Duration::days(offset),
                open: p,
                high: p,
                low: p,
                close: p,
                volume: 0,
                adj_close: p,
            }
        })
        .collect()
}

// ── Properties ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn asof_never_looks_forward(keys in arb_dates(30), candidates in arb_dates(30)) {
        let out = asof_backward(&keys, &candidates);

        let mut distinct = keys.clone();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(out.iter().map(|(k, _)| *k).collect::<Vec<_>>(), distinct);

        for (key, matched) in out {
            let expected = candidates.iter().filter(|c| **c <= key).max().copied();
            prop_assert_eq!(matched, expected);
        }
    }

    #[test]
    fn panel_is_a_full_grid(
        a in arb_series(),
        b in arb_series(),
        horizon in 1usize..10,
    ) {
        let input = vec![("A".to_string(), to_bars(&a)), ("B".to_string(), to_bars(&b))];
        let panel = build_panel(&input, horizon);

        prop_assert_eq!(panel.len(), panel.dates().len() * 2);
        for date in panel.dates() {
            prop_assert!(panel.get("A", *date).is_some());
            prop_assert!(panel.get("B", *date).is_some());
        }
    }

    #[test]
    fn shifted_fields_agree(series in arb_series(), other in arb_series(), horizon in 1usize..10) {
        let input = vec![("A".to_string(), to_bars(&series)), ("B".to_string(), to_bars(&other))];
        let panel = build_panel(&input, horizon);
        let rows: Vec<_> = panel.ticker_rows("A").collect();

        for (i, row) in rows.iter().enumerate() {
            match rows.get(i + horizon) {
                Some(ahead) => {
                    prop_assert_eq!(row.next_date, Some(ahead.date));
                    prop_assert_eq!(row.next_price, ahead.price);
                    prop_assert_eq!(ahead.prev_date, Some(row.date));
                    prop_assert_eq!(ahead.prev_price, row.price);
                    prop_assert_eq!(ahead.prev_return, row.next_return);
                }
                None => {
                    prop_assert_eq!(row.next_date, None);
                    prop_assert_eq!(row.next_return, None);
                }
            }
        }
    }

    #[test]
    fn no_price_before_first_bar(series in arb_series(), other in arb_series()) {
        let bars = to_bars(&series);
        let first_priced = bars
            .iter()
            .filter(|b| b.adjusted_price().is_some())
            .map(|b| b.date)
            .min();
        let input = vec![("A".to_string(), bars), ("B".to_string(), to_bars(&other))];
        let panel = build_panel(&input, 1);

        for row in panel.ticker_rows("A") {
            let before_first = first_priced.map_or(true, |first| row.date < first);
            prop_assert_eq!(row.price.is_none(), before_first);
        }
    }
}
