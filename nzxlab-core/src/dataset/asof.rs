//! Backward as-of lookup between two date sets.

use chrono::NaiveDate;

/// For every distinct key date, the latest candidate date on or before it.
///
/// Both inputs may be unsorted and contain duplicates. The result is sorted
/// by key; keys earlier than every candidate map to `None`.
pub fn asof_backward(
    keys: &[NaiveDate],
    candidates: &[NaiveDate],
) -> Vec<(NaiveDate, Option<NaiveDate>)> {
    let mut keys = keys.to_vec();
    keys.sort_unstable();
    keys.dedup();

    let mut candidates = candidates.to_vec();
    candidates.sort_unstable();
    candidates.dedup();

    let mut out = Vec::with_capacity(keys.len());
    let mut next = 0;
    let mut matched = None;
    for key in keys {
        while next < candidates.len() && candidates[next] <= key {
            matched = Some(candidates[next]);
            next += 1;
        }
        out.push((key, matched));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, day).unwrap()
    }

    #[test]
    fn exact_and_backward_matches() {
        let trading = [d(3, 29), d(3, 30), d(4, 3)];
        let statements = [d(3, 31), d(3, 30), d(6, 30), d(3, 31)];
        assert_eq!(
            asof_backward(&statements, &trading),
            vec![
                (d(3, 30), Some(d(3, 30))),
                (d(3, 31), Some(d(3, 30))),
                (d(6, 30), Some(d(4, 3))),
            ]
        );
    }

    #[test]
    fn keys_before_history_are_unmatched() {
        let out = asof_backward(&[d(1, 1), d(3, 29)], &[d(3, 29)]);
        assert_eq!(out, vec![(d(1, 1), None), (d(3, 29), Some(d(3, 29)))]);
    }

    #[test]
    fn empty_candidates() {
        assert_eq!(asof_backward(&[d(1, 1)], &[]), vec![(d(1, 1), None)]);
        assert!(asof_backward(&[], &[d(1, 1)]).is_empty());
    }
}
