//! Stream merging.
//!
//! Incremental fetches overlap the previously merged history. Both inputs
//! are sorted by `(timestamp, callsign)` with unique keys; the merge is a
//! single linear pass and a key present in both keeps the newer copy, which
//! has had more time to accumulate receptions.

use std::cmp::Ordering;

use crate::types::RawReport;

/// Merge two report sequences sorted by [`RawReport::key`].
///
/// On a key collision the element from `new` wins. Merging the same `new`
/// batch into the result again yields the result unchanged.
pub fn merge_reports(old: &[RawReport], new: &[RawReport]) -> Vec<RawReport> {
    merge_by(old, new, |a, b| a.key().cmp(&b.key()))
}

/// Linear merge of two slices sorted under `cmp`, preferring `new` on
/// equal elements.
pub fn merge_by<T, F>(old: &[T], new: &[T], cmp: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering,
{
    let mut out = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        match cmp(&old[i], &new[j]) {
            Ordering::Less => {
                out.push(old[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                out.push(new[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                out.push(new[j].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&old[i..]);
    out.extend_from_slice(&new[j..]);
    out
}

/// Sort a freshly parsed batch by key and drop duplicate keys, keeping the
/// last occurrence. Feeds rarely need this but merging requires it.
pub fn sort_and_dedup(reports: &mut Vec<RawReport>) {
    reports.sort_by(|a, b| a.key().cmp(&b.key()));
    let mut deduped: Vec<RawReport> = Vec::with_capacity(reports.len());
    for r in reports.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.key() == r.key() => *last = r,
            _ => deduped.push(r),
        }
    }
    *reports = deduped;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reception;
    use chrono::{TimeZone, Utc};

    fn report(minute: u32, callsign: &str, rx: usize) -> RawReport {
        let receptions = (0..rx)
            .map(|k| Reception::new(&format!("RX{k}"), "FN20", 14_097_050, -10))
            .collect();
        RawReport::new(
            Utc.with_ymd_and_hms(2025, 7, 13, 12, minute, 0).unwrap(),
            callsign,
            "FN31",
            23,
            receptions,
        )
    }

    fn keys(v: &[RawReport]) -> Vec<(u32, String)> {
        use chrono::Timelike;
        v.iter()
            .map(|r| (r.timestamp.minute(), r.callsign.clone()))
            .collect()
    }

    #[test]
    fn test_merge_interleaves() {
        let old = vec![report(0, "A", 1), report(4, "A", 1)];
        let new = vec![report(2, "A", 1), report(6, "A", 1)];
        let out = merge_reports(&old, &new);
        assert_eq!(
            keys(&out),
            vec![(0, "A".into()), (2, "A".into()), (4, "A".into()), (6, "A".into())]
        );
    }

    #[test]
    fn test_merge_orders_by_callsign_within_minute() {
        let old = vec![report(0, "B", 1)];
        let new = vec![report(0, "A", 1)];
        let out = merge_reports(&old, &new);
        assert_eq!(keys(&out), vec![(0, "A".into()), (0, "B".into())]);
    }

    #[test]
    fn test_collision_prefers_new() {
        let old = vec![report(0, "A", 1), report(2, "A", 1)];
        let new = vec![report(2, "A", 3)];
        let out = merge_reports(&old, &new);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].receptions.len(), 3);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let old = vec![report(0, "A", 1), report(2, "A", 1), report(8, "Q", 1)];
        let new = vec![report(2, "A", 2), report(4, "A", 2), report(8, "B", 1)];
        let once = merge_reports(&old, &new);
        let twice = merge_reports(&once, &new);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_with_empty() {
        let a = vec![report(0, "A", 1)];
        assert_eq!(merge_reports(&a, &[]), a);
        assert_eq!(merge_reports(&[], &a), a);
        assert!(merge_reports(&[], &[]).is_empty());
    }

    #[test]
    fn test_merge_by_comparator() {
        // Equal under the comparator means the new element wins.
        let old = vec![(1, "b".to_string()), (3, "a".to_string())];
        let new = vec![(2, "x".to_string()), (3, "z".to_string())];
        let out = merge_by(&old, &new, |a, b| a.0.cmp(&b.0));
        assert_eq!(out, vec![(1, "b".into()), (2, "x".into()), (3, "z".into())]);
    }

    #[test]
    fn test_sort_and_dedup_keeps_last() {
        let mut v = vec![report(4, "A", 1), report(0, "A", 1), report(4, "A", 2)];
        sort_and_dedup(&mut v);
        assert_eq!(keys(&v), vec![(0, "A".into()), (4, "A".into())]);
        assert_eq!(v[1].receptions.len(), 2);
    }
}
