//! Splicing archive data into an existing time-ordered series.
//!
//! [`merge`] is the only code path that may introduce samples anywhere but
//! the "now" end of a series, and therefore the place where chronological
//! ordering is enforced. New data wins over old data wherever their time
//! ranges overlap: a client typically re-fetches a range it already holds
//! and expects the fresh (possibly better-resolved) samples to replace the
//! stale ones.

use chrono::{DateTime, Utc};

use crate::sample::Sample;

/// Index of the first sample with `time > t`, or `samples.len()` if none.
pub(crate) fn first_after(samples: &[Sample], t: DateTime<Utc>) -> usize {
    samples.partition_point(|s| s.time() <= t)
}

/// Number of leading samples with `time < t` (equivalently: index one past
/// the last sample strictly before `t`).
pub(crate) fn count_before(samples: &[Sample], t: DateTime<Utc>) -> usize {
    samples.partition_point(|s| s.time() < t)
}

/// Merge `add` into `old`. Both inputs must be non-decreasing in time.
///
/// The result is non-decreasing and contains all of `add`; samples of `old`
/// whose timestamps fall inside `[add[0].time, add[last].time]` are dropped.
/// Boundary samples are attributed to `add`, never duplicated from `old`.
pub fn merge(old: &[Sample], add: &[Sample]) -> Vec<Sample> {
    // Degenerate: nothing to merge.
    if add.is_empty() {
        return old.to_vec();
    }
    if old.is_empty() {
        return add.to_vec();
    }

    let add_first = add[0].time();
    let add_last = add[add.len() - 1].time();
    let old_first = old[0].time();

    let mut result;
    if add_last < old_first {
        // `add` lies entirely before `old`.
        result = Vec::with_capacity(add.len() + old.len());
        result.extend_from_slice(add);
        result.extend_from_slice(old);
    } else if add_first <= old_first {
        // `add` starts at/before `old`; keep only the `old` suffix strictly
        // after `add`'s end.
        let suffix = first_after(old, add_last);
        result = Vec::with_capacity(add.len() + old.len() - suffix);
        result.extend_from_slice(add);
        result.extend_from_slice(&old[suffix..]);
    } else {
        // `add` starts within (or after) `old`'s range: old prefix strictly
        // before `add`, then `add`, then old suffix strictly after `add`.
        let prefix = count_before(old, add_first);
        let suffix = first_after(old, add_last);
        result = Vec::with_capacity(prefix + add.len() + old.len() - suffix);
        result.extend_from_slice(&old[..prefix]);
        result.extend_from_slice(add);
        result.extend_from_slice(&old[suffix..]);
    }

    debug_assert!(
        result.windows(2).all(|w| w[0].time() <= w[1].time()),
        "merge produced out-of-order result"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Quality;
    use chrono::TimeZone;

    fn s(t: i64, v: f64) -> Sample {
        Sample::new("test", Utc.timestamp_opt(t, 0).unwrap(), v, Quality::Ok)
    }

    fn times(samples: &[Sample]) -> Vec<i64> {
        samples.iter().map(|s| s.time().timestamp()).collect()
    }

    fn values(samples: &[Sample]) -> Vec<f64> {
        samples.iter().map(|s| s.value()).collect()
    }

    #[test]
    fn empty_inputs_pass_through() {
        let old = vec![s(0, 1.0), s(10, 2.0)];
        assert_eq!(merge(&old, &[]), old);
        assert_eq!(merge(&[], &old), old);
        assert!(merge(&[], &[]).is_empty());
    }

    #[test]
    fn add_entirely_before_old() {
        let old = vec![s(100, 1.0), s(200, 2.0)];
        let add = vec![s(10, 9.0), s(20, 8.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![10, 20, 100, 200]);
        assert_eq!(values(&merged), vec![9.0, 8.0, 1.0, 2.0]);
    }

    #[test]
    fn add_covers_old_start() {
        let old = vec![s(10, 1.0), s(20, 2.0), s(30, 3.0)];
        let add = vec![s(5, 9.0), s(20, 8.0)];
        // Old sample exactly at add's end boundary (t=20) belongs to add.
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![5, 20, 30]);
        assert_eq!(values(&merged), vec![9.0, 8.0, 3.0]);
    }

    #[test]
    fn add_swallows_old_entirely() {
        let old = vec![s(10, 1.0), s(20, 2.0)];
        let add = vec![s(5, 9.0), s(25, 8.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![5, 25]);
        assert_eq!(values(&merged), vec![9.0, 8.0]);
    }

    #[test]
    fn add_inside_old_range() {
        // Worked example from the merge contract.
        let old = vec![s(0, 1.0), s(10, 2.0), s(20, 3.0)];
        let add = vec![s(10, 9.0), s(15, 8.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![0, 10, 15, 20]);
        assert_eq!(values(&merged), vec![1.0, 9.0, 8.0, 3.0]);
    }

    #[test]
    fn add_entirely_after_old() {
        let old = vec![s(0, 1.0), s(10, 2.0)];
        let add = vec![s(20, 9.0), s(30, 8.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![0, 10, 20, 30]);
    }

    #[test]
    fn identical_range_replaces_old() {
        let old = vec![s(0, 1.0), s(10, 2.0), s(20, 3.0)];
        let add = vec![s(0, 9.0), s(10, 8.0), s(20, 7.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![0, 10, 20]);
        assert_eq!(values(&merged), vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn boundary_samples_come_from_add_only() {
        // Old has samples exactly at both of add's boundary timestamps;
        // neither may survive.
        let old = vec![s(0, 1.0), s(10, 2.0), s(20, 3.0), s(30, 4.0)];
        let add = vec![s(10, 9.0), s(20, 8.0)];
        let merged = merge(&old, &add);
        assert_eq!(times(&merged), vec![0, 10, 20, 30]);
        assert_eq!(values(&merged), vec![1.0, 9.0, 8.0, 4.0]);
    }

    #[test]
    fn result_is_ordered_for_all_offsets() {
        let old: Vec<Sample> = (0..10).map(|i| s(i * 10, i as f64)).collect();
        for start in -2i64..12 {
            let add = vec![s(start * 10, 100.0), s(start * 10 + 15, 101.0)];
            let merged = merge(&old, &add);
            assert!(
                merged.windows(2).all(|w| w[0].time() <= w[1].time()),
                "unordered result for start {start}"
            );
            // Every timestamp inside add's range must carry add's value.
            for m in &merged {
                let t = m.time();
                if t >= add[0].time() && t <= add[1].time() {
                    assert!(m.value() >= 100.0, "old sample survived inside add range at {t}");
                }
            }
        }
    }
}
