//! Length buckets over the joint (source, target) space.

use tracing::info;

/// `(max_source_length, max_target_length)` of a capacity class.
pub type Bucket = (usize, usize);

/// Multiples of `step` below `max_len`, followed by `max_len` itself.
///
/// ```ignore
/// assert_eq!(define_buckets(11, 5), vec![5, 10, 11]);
/// ```
pub fn define_buckets(max_len: usize, step: usize) -> Vec<usize> {
    let step = step.max(1);
    let mut buckets: Vec<usize> = (step..max_len).step_by(step).collect();
    buckets.push(max_len);
    buckets.dedup();
    buckets
}

/// Defines buckets covering the joint length distribution of a parallel corpus.
///
/// With `bucket_scaling` the step size of the shorter side is scaled by
/// `length_ratio` (target length / source length), so that buckets follow the
/// diagonal of the observed distribution instead of the identity line. The shorter
/// boundary list is padded with its last value, every boundary is at least 2 (the
/// target side carries a BOS symbol), and the deduplicated pairs are sorted. The
/// final bucket is always `(max_seq_len_source, max_seq_len_target)`.
pub fn define_parallel_buckets(
    max_seq_len_source: usize,
    max_seq_len_target: usize,
    bucket_width: usize,
    bucket_scaling: bool,
    length_ratio: f64,
) -> Vec<Bucket> {
    let mut source_step_size = bucket_width;
    let mut target_step_size = bucket_width;
    if bucket_scaling {
        if length_ratio >= 1.0 {
            source_step_size = scaled_step(bucket_width as f64 / length_ratio);
        } else {
            target_step_size = scaled_step(bucket_width as f64 * length_ratio);
        }
    }
    let mut source_buckets = define_buckets(max_seq_len_source, source_step_size);
    let mut target_buckets = define_buckets(max_seq_len_target, target_step_size);

    pad_to_len(&mut source_buckets, target_buckets.len());
    pad_to_len(&mut target_buckets, source_buckets.len());

    let mut buckets: Vec<Bucket> = source_buckets
        .into_iter()
        .zip(target_buckets)
        .map(|(source, target)| (source.max(2), target.max(2)))
        .collect();
    buckets.sort_unstable();
    buckets.dedup();
    buckets
}

fn scaled_step(step: f64) -> usize {
    (step.round_ties_even() as usize).max(1)
}

fn pad_to_len(boundaries: &mut Vec<usize>, len: usize) {
    if let Some(&last) = boundaries.last() {
        boundaries.resize(len.max(boundaries.len()), last);
    }
}

/// Smallest boundary that fits `length`, `None` if it exceeds all of them.
pub fn get_bucket(length: usize, buckets: &[usize]) -> Option<usize> {
    let index = buckets.partition_point(|&bucket| bucket < length);
    buckets.get(index).copied()
}

/// First bucket, in definition order, that fits both lengths.
pub fn get_parallel_bucket(
    buckets: &[Bucket],
    source_length: usize,
    target_length: usize,
) -> Option<(usize, Bucket)> {
    buckets
        .iter()
        .enumerate()
        .find(|(_, &(source, target))| source >= source_length && target >= target_length)
        .map(|(index, &bucket)| (index, bucket))
}

pub(crate) fn log_buckets(buckets: &[Bucket]) {
    info!(
        "{} sequence length buckets: {}",
        buckets.len(),
        buckets
            .iter()
            .map(|(source, target)| format!("({source}, {target})"))
            .collect::<Vec<_>>()
            .join(" ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_buckets() {
        let cases = [
            (50, 10, vec![10, 20, 30, 40, 50]),
            (50, 20, vec![20, 40, 50]),
            (50, 50, vec![50]),
            (5, 10, vec![5]),
            (11, 5, vec![5, 10, 11]),
            (19, 10, vec![10, 19]),
        ];
        for (max_len, step, expected) in cases {
            assert_eq!(define_buckets(max_len, step), expected, "max_len={max_len} step={step}");
        }
    }

    #[test]
    fn test_define_buckets_properties() {
        for max_len in 1..60 {
            for step in 1..15 {
                let buckets = define_buckets(max_len, step);
                assert_eq!(*buckets.last().unwrap(), max_len);
                assert!(buckets.windows(2).all(|w| w[0] < w[1]));
                assert!(buckets[..buckets.len() - 1].iter().all(|b| b % step == 0));
            }
        }
    }

    #[test]
    fn test_define_parallel_buckets() {
        let cases: Vec<(usize, usize, usize, bool, f64, Vec<Bucket>)> = vec![
            (50, 50, 10, true, 1.0, vec![(10, 10), (20, 20), (30, 30), (40, 40), (50, 50)]),
            (
                50,
                50,
                10,
                true,
                0.5,
                vec![
                    (10, 5),
                    (20, 10),
                    (30, 15),
                    (40, 20),
                    (50, 25),
                    (50, 30),
                    (50, 35),
                    (50, 40),
                    (50, 45),
                    (50, 50),
                ],
            ),
            (
                10,
                10,
                10,
                true,
                0.1,
                vec![(10, 2), (10, 3), (10, 4), (10, 5), (10, 6), (10, 7), (10, 8), (10, 9), (10, 10)],
            ),
            (10, 5, 10, true, 0.01, vec![(10, 2), (10, 3), (10, 4), (10, 5)]),
            (
                50,
                50,
                10,
                true,
                2.0,
                vec![
                    (5, 10),
                    (10, 20),
                    (15, 30),
                    (20, 40),
                    (25, 50),
                    (30, 50),
                    (35, 50),
                    (40, 50),
                    (45, 50),
                    (50, 50),
                ],
            ),
            (5, 10, 10, true, 10.0, vec![(2, 10), (3, 10), (4, 10), (5, 10)]),
            (5, 10, 10, true, 11.0, vec![(2, 10), (3, 10), (4, 10), (5, 10)]),
            (50, 50, 50, true, 0.5, vec![(50, 25), (50, 50)]),
            (50, 50, 50, true, 1.5, vec![(33, 50), (50, 50)]),
            (75, 75, 50, true, 1.5, vec![(33, 50), (66, 75), (75, 75)]),
            (
                50,
                50,
                8,
                false,
                1.5,
                vec![(8, 8), (16, 16), (24, 24), (32, 32), (40, 40), (48, 48), (50, 50)],
            ),
            (
                50,
                75,
                8,
                false,
                1.5,
                vec![
                    (8, 8),
                    (16, 16),
                    (24, 24),
                    (32, 32),
                    (40, 40),
                    (48, 48),
                    (50, 56),
                    (50, 64),
                    (50, 72),
                    (50, 75),
                ],
            ),
        ];
        for (max_source, max_target, width, scaling, ratio, expected) in cases {
            let buckets = define_parallel_buckets(max_source, max_target, width, scaling, ratio);
            assert_eq!(buckets, expected, "({max_source}, {max_target}, {width}, {scaling}, {ratio})");
            assert_eq!(*buckets.last().unwrap(), (max_source, max_target));
        }
    }

    #[test]
    fn test_get_bucket() {
        let buckets = [10, 20, 30, 40, 50];
        assert_eq!(get_bucket(50, &buckets), Some(50));
        assert_eq!(get_bucket(11, &buckets), Some(20));
        assert_eq!(get_bucket(9, &buckets), Some(10));
        assert_eq!(get_bucket(51, &buckets), None);
        assert_eq!(get_bucket(1, &buckets), Some(10));
        assert_eq!(get_bucket(0, &buckets), Some(10));
        assert_eq!(get_bucket(50, &[]), None);
    }

    #[test]
    fn test_get_parallel_bucket() {
        let buckets = [(10, 10), (20, 20), (30, 30), (40, 40), (50, 50)];
        assert_eq!(get_parallel_bucket(&buckets, 50, 50), Some((4, (50, 50))));
        assert_eq!(get_parallel_bucket(&buckets, 50, 10), Some((4, (50, 50))));
        assert_eq!(get_parallel_bucket(&buckets, 20, 10), Some((1, (20, 20))));
        assert_eq!(get_parallel_bucket(&[(10, 10)], 20, 10), None);
        assert_eq!(get_parallel_bucket(&[], 20, 10), None);
        assert_eq!(get_parallel_bucket(&[(10, 11)], 11, 10), None);
        assert_eq!(get_parallel_bucket(&[(11, 10)], 11, 10), Some((0, (11, 10))));
    }
}
