//! Pairing of encoded corpus streams, corpus statistics and conversion of sentence
//! pairs into a bucketed [`ParallelDataSet`].

use crate::alignment::{create_alignment_matrix, AlignmentIndices, AlignmentMatrix};
use crate::bucket::{get_parallel_bucket, Bucket};
use crate::config::DataStatistics;
use crate::constants::{PAD_ID, UNK_ID};
use crate::dataset::{token_tensor, ParallelDataSet};
use crate::error::{DataError, Result};
use crate::token::Sequence;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::Tensor;
use tracing::info;

/// Line-by-line stream of one factor of a corpus side.
pub type SequenceStream<'a> = Box<dyn Iterator<Item = Result<Option<Sequence>>> + 'a>;

pub type AlignmentStream<'a> = Box<dyn Iterator<Item = Result<AlignmentIndices>> + 'a>;

/// One sentence pair: every factor of both sides, plus the word alignment if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSample {
    pub source: Vec<Sequence>,
    pub target: Vec<Sequence>,
    pub alignment: Option<AlignmentIndices>,
}

impl ParallelSample {
    pub fn source_len(&self) -> usize {
        self.source.first().map_or(0, Vec::len)
    }

    pub fn target_len(&self) -> usize {
        self.target.first().map_or(0, Vec::len)
    }
}

const DIFFERENT_LINE_COUNTS: &str =
    "Different number of lines in source(s) or target(s) or alignment matrix (if specified) iterables.";

pub struct ParallelIter<'a> {
    sources: Vec<SequenceStream<'a>>,
    targets: Vec<SequenceStream<'a>>,
    alignments: Option<AlignmentStream<'a>>,
    done: bool,
}

/// Zips source factors, target factors and optionally alignments line by line.
///
/// Lines where any factor of either side is empty are skipped. All factors of a
/// side must have the same length on every line, and all streams must have the
/// same number of lines; either violation ends the iteration with an error.
pub fn parallel_iter<'a>(
    sources: Vec<SequenceStream<'a>>,
    targets: Vec<SequenceStream<'a>>,
    alignments: Option<AlignmentStream<'a>>,
) -> ParallelIter<'a> {
    ParallelIter {
        sources,
        targets,
        alignments,
        done: false,
    }
}

fn read_line(streams: &mut [SequenceStream<'_>]) -> Result<Vec<Option<Option<Sequence>>>> {
    streams.iter_mut().map(|s| s.next().transpose()).collect()
}

fn are_token_parallel(sequences: &[Sequence]) -> bool {
    sequences.windows(2).all(|w| w[0].len() == w[1].len())
}

impl ParallelIter<'_> {
    fn next_sample(&mut self) -> Result<Option<ParallelSample>> {
        loop {
            let sources = read_line(&mut self.sources)?;
            let targets = read_line(&mut self.targets)?;
            let alignment = match self.alignments.as_mut() {
                Some(stream) => Some(stream.next().transpose()?),
                None => None,
            };

            let lines = sources.iter().chain(&targets);
            let (ended, total) = (lines.clone().filter(|l| l.is_none()).count(), lines.count());
            if ended == total {
                if matches!(alignment, Some(Some(_))) {
                    return Err(DataError::AlignmentMismatch(DIFFERENT_LINE_COUNTS.to_string()));
                }
                return Ok(None);
            }
            if ended > 0 {
                return Err(DataError::NotParallel(DIFFERENT_LINE_COUNTS.to_string()));
            }
            let alignment = match alignment {
                Some(None) => {
                    return Err(DataError::AlignmentMismatch(DIFFERENT_LINE_COUNTS.to_string()))
                }
                Some(Some(indices)) => Some(indices),
                None => None,
            };

            let (Some(sources), Some(targets)) = (
                sources.into_iter().flatten().collect::<Option<Vec<_>>>(),
                targets.into_iter().flatten().collect::<Option<Vec<_>>>(),
            ) else {
                continue;
            };
            if !are_token_parallel(&sources) {
                return Err(DataError::NotParallel(format!(
                    "Source sequences are not token-parallel: {sources:?}"
                )));
            }
            if !are_token_parallel(&targets) {
                return Err(DataError::NotParallel(format!(
                    "Target sequences are not token-parallel: {targets:?}"
                )));
            }
            return Ok(Some(ParallelSample {
                source: sources,
                target: targets,
                alignment,
            }));
        }
    }
}

impl Iterator for ParallelIter<'_> {
    type Item = Result<ParallelSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let sample = self.next_sample().transpose();
        if !matches!(sample, Some(Ok(_))) {
            self.done = true;
        }
        sample
    }
}

/// Welford's online mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OnlineMeanAndVariance {
    count: usize,
    mean: f64,
    m2: f64,
}

impl OnlineMeanAndVariance {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 before the first value.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthStatistics {
    pub num_sents: usize,
    pub length_ratio_mean: f64,
    pub length_ratio_std: f64,
}

/// Target/source length ratio over all pairs whose first factors fit the limits.
pub fn calculate_length_statistics<I, S>(
    samples: I,
    max_seq_len_source: usize,
    max_seq_len_target: usize,
) -> Result<LengthStatistics>
where
    I: IntoIterator<Item = Result<S>>,
    S: Borrow<ParallelSample>,
{
    let mut length_ratio = OnlineMeanAndVariance::default();
    for sample in samples {
        let sample = sample?;
        let sample = sample.borrow();
        let (source_len, target_len) = (sample.source_len(), sample.target_len());
        if source_len == 0 || source_len > max_seq_len_source || target_len > max_seq_len_target {
            continue;
        }
        length_ratio.update(target_len as f64 / source_len as f64);
    }
    Ok(LengthStatistics {
        num_sents: length_ratio.count(),
        length_ratio_mean: length_ratio.mean(),
        length_ratio_std: length_ratio.std(),
    })
}

/// Collects [`DataStatistics`] while pairs are assigned to buckets.
#[derive(Debug, Clone)]
pub struct DataStatisticsAccumulator {
    buckets: Vec<Bucket>,
    size_vocab_source: usize,
    size_vocab_target: usize,
    num_sents: usize,
    num_discarded: usize,
    num_tokens_source: usize,
    num_tokens_target: usize,
    num_unks_source: usize,
    num_unks_target: usize,
    max_observed_len_source: usize,
    max_observed_len_target: usize,
    length_ratio: OnlineMeanAndVariance,
    target_len_per_bucket: Vec<OnlineMeanAndVariance>,
    length_ratio_per_bucket: Vec<OnlineMeanAndVariance>,
}

impl DataStatisticsAccumulator {
    pub fn new(buckets: &[Bucket], size_vocab_source: usize, size_vocab_target: usize) -> Self {
        Self {
            buckets: buckets.to_vec(),
            size_vocab_source,
            size_vocab_target,
            num_sents: 0,
            num_discarded: 0,
            num_tokens_source: 0,
            num_tokens_target: 0,
            num_unks_source: 0,
            num_unks_target: 0,
            max_observed_len_source: 0,
            max_observed_len_target: 0,
            length_ratio: OnlineMeanAndVariance::default(),
            target_len_per_bucket: vec![OnlineMeanAndVariance::default(); buckets.len()],
            length_ratio_per_bucket: vec![OnlineMeanAndVariance::default(); buckets.len()],
        }
    }

    /// Records one pair; `bucket_index` is `None` for pairs that fit no bucket.
    pub fn sequence_pair(&mut self, source: &[i32], target: &[i32], bucket_index: Option<usize>) {
        let Some(bucket_index) = bucket_index else {
            self.num_discarded += 1;
            return;
        };
        let (source_len, target_len) = (source.len(), target.len());
        self.num_sents += 1;
        self.num_tokens_source += source_len;
        self.num_tokens_target += target_len;
        self.num_unks_source += source.iter().filter(|&&id| id == UNK_ID).count();
        self.num_unks_target += target.iter().filter(|&&id| id == UNK_ID).count();
        self.max_observed_len_source = self.max_observed_len_source.max(source_len);
        self.max_observed_len_target = self.max_observed_len_target.max(target_len);

        let ratio = target_len as f64 / source_len.max(1) as f64;
        self.length_ratio.update(ratio);
        self.length_ratio_per_bucket[bucket_index].update(ratio);
        self.target_len_per_bucket[bucket_index].update(target_len as f64);
    }

    pub fn statistics(&self) -> DataStatistics {
        let per_bucket = |stats: &OnlineMeanAndVariance| (stats.count() > 0).then_some(*stats);
        DataStatistics {
            num_sents: self.num_sents,
            num_discarded: self.num_discarded,
            num_tokens_source: self.num_tokens_source,
            num_tokens_target: self.num_tokens_target,
            num_unks_source: self.num_unks_source,
            num_unks_target: self.num_unks_target,
            max_observed_len_source: self.max_observed_len_source,
            max_observed_len_target: self.max_observed_len_target,
            size_vocab_source: self.size_vocab_source,
            size_vocab_target: self.size_vocab_target,
            length_ratio_mean: self.length_ratio.mean(),
            length_ratio_std: self.length_ratio.std(),
            buckets: self.buckets.clone(),
            num_sents_per_bucket: self.target_len_per_bucket.iter().map(|s| s.count()).collect(),
            average_len_target_per_bucket: self
                .target_len_per_bucket
                .iter()
                .map(|s| per_bucket(s).map(|s| s.mean()))
                .collect(),
            length_ratio_stats_per_bucket: self
                .length_ratio_per_bucket
                .iter()
                .map(|s| per_bucket(s).map(|s| (s.mean(), s.std())))
                .collect(),
        }
    }
}

pub(crate) fn log_statistics(statistics: &DataStatistics) {
    info!(
        "{} sequences, {} discarded ({} source tokens, {} target tokens)",
        statistics.num_sents,
        statistics.num_discarded,
        statistics.num_tokens_source,
        statistics.num_tokens_target
    );
    info!(
        "Unknown tokens: source {}, target {}; longest observed: source {}, target {}",
        statistics.num_unks_source,
        statistics.num_unks_target,
        statistics.max_observed_len_source,
        statistics.max_observed_len_target
    );
    info!(
        "Mean length ratio: {:.2} (+-{:.2})",
        statistics.length_ratio_mean, statistics.length_ratio_std
    );
    for ((bucket, count), ratio) in statistics
        .buckets
        .iter()
        .zip(&statistics.num_sents_per_bucket)
        .zip(&statistics.length_ratio_stats_per_bucket)
    {
        if let Some((mean, std)) = ratio {
            info!("Bucket {bucket:?}: {count} samples, length ratio {mean:.2} (+-{std:.2})");
        }
    }
}

/// Builds a bucketed [`ParallelDataSet`] from sentence pairs.
#[derive(Debug, Clone)]
pub struct RawParallelDatasetLoader {
    buckets: Vec<Bucket>,
    num_source_factors: usize,
    num_target_factors: usize,
    eop_id: Option<i32>,
}

impl RawParallelDatasetLoader {
    /// `eop_id` marks the end of a prefix prepended to the source; when set, the
    /// length of that prefix is stored for every sample.
    pub fn new(
        buckets: &[Bucket],
        num_source_factors: usize,
        num_target_factors: usize,
        eop_id: Option<i32>,
    ) -> Self {
        Self {
            buckets: buckets.to_vec(),
            num_source_factors,
            num_target_factors,
            eop_id,
        }
    }

    /// Pads every pair to the size of its bucket. Pairs fitting no bucket are
    /// dropped; either all pairs carry alignments or none does.
    pub fn load(&self, samples: &[ParallelSample]) -> Result<ParallelDataSet> {
        let num_buckets = self.buckets.len();
        let with_alignment = samples.first().is_some_and(|s| s.alignment.is_some());
        if samples.iter().any(|s| s.alignment.is_some() != with_alignment) {
            return Err(DataError::AlignmentMismatch(
                "Either all or no sentence pairs must carry an alignment".to_string(),
            ));
        }

        let mut assigned: Vec<Vec<&ParallelSample>> = vec![vec![]; num_buckets];
        for sample in samples {
            if sample.source.len() != self.num_source_factors
                || sample.target.len() != self.num_target_factors
            {
                return Err(DataError::config(format!(
                    "Expected {} source and {} target factors, got {} and {}",
                    self.num_source_factors,
                    self.num_target_factors,
                    sample.source.len(),
                    sample.target.len()
                )));
            }
            if let Some((index, _)) =
                get_parallel_bucket(&self.buckets, sample.source_len(), sample.target_len())
            {
                assigned[index].push(sample);
            }
        }

        let mut source = Vec::with_capacity(num_buckets);
        let mut target = Vec::with_capacity(num_buckets);
        let mut prepended = Vec::with_capacity(num_buckets);
        let mut alignments = Vec::with_capacity(num_buckets);
        for (&bucket, samples) in self.buckets.iter().zip(&assigned) {
            let (source_len, target_len) = bucket;
            source.push(pad_side(samples.iter().map(|s| &s.source), source_len, self.num_source_factors));
            target.push(pad_side(samples.iter().map(|s| &s.target), target_len, self.num_target_factors));
            if let Some(eop_id) = self.eop_id {
                let lengths: Vec<i32> = samples
                    .iter()
                    .map(|s| prepended_length(&s.source[0], eop_id))
                    .collect();
                prepended.push(Tensor::from_slice(&lengths));
            }
            if with_alignment {
                let rows = samples
                    .iter()
                    .map(|s| create_alignment_matrix(s.alignment.as_deref().unwrap_or_default(), bucket))
                    .collect::<Result<Vec<_>>>()?;
                let matrix = if rows.is_empty() {
                    AlignmentMatrix::empty(source_len * target_len)
                } else {
                    AlignmentMatrix::concat(&rows.iter().collect::<Vec<_>>())?
                };
                alignments.push(matrix);
            }
        }
        info!(
            "Loaded {} sentence pairs into {} buckets",
            assigned.iter().map(Vec::len).sum::<usize>(),
            num_buckets
        );

        ParallelDataSet::new(
            source,
            target,
            self.eop_id.is_some().then_some(prepended),
            with_alignment.then_some(alignments),
        )
    }
}

/// `(samples, length, factors)` tensor with PAD after the end of every sequence.
fn pad_side<'s>(
    sides: impl ExactSizeIterator<Item = &'s Vec<Sequence>>,
    length: usize,
    num_factors: usize,
) -> Tensor {
    let num_samples = sides.len();
    let mut data = vec![PAD_ID; num_samples * length * num_factors];
    for (i, factors) in sides.enumerate() {
        for (f, sequence) in factors.iter().enumerate() {
            for (t, &id) in sequence.iter().enumerate() {
                data[(i * length + t) * num_factors + f] = id;
            }
        }
    }
    token_tensor(&data, &[num_samples as i64, length as i64, num_factors as i64])
}

/// Length of the prefix up to and including the first `eop_id`, 0 without one.
fn prepended_length(source: &[i32], eop_id: i32) -> i32 {
    source
        .iter()
        .position(|&id| id == eop_id)
        .map_or(0, |position| position as i32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tensor_to_vec;

    type Lines = Vec<Option<Sequence>>;

    fn streams(sides: Vec<Lines>) -> Vec<SequenceStream<'static>> {
        sides
            .into_iter()
            .map(|lines| Box::new(lines.into_iter().map(Ok::<_, DataError>)) as SequenceStream<'static>)
            .collect()
    }

    fn full(lines: Vec<Vec<i32>>) -> Lines {
        lines.into_iter().map(Some).collect()
    }

    fn pairs(sources: Vec<Lines>, targets: Vec<Lines>) -> Result<Vec<(Vec<Sequence>, Vec<Sequence>)>> {
        parallel_iter(streams(sources), streams(targets), None)
            .map(|s| s.map(|s| (s.source, s.target)))
            .collect()
    }

    #[test]
    fn test_parallel_iter() -> Result<()> {
        let source = full(vec![vec![0], vec![1, 1]]);
        let target = full(vec![vec![0], vec![1, 1]]);
        assert_eq!(
            pairs(vec![source.clone(), source], vec![target])?,
            vec![
                (vec![vec![0], vec![0]], vec![vec![0]]),
                (vec![vec![1, 1], vec![1, 1]], vec![vec![1, 1]]),
            ]
        );

        let sources = vec![vec![Some(vec![0]), None], vec![Some(vec![0]), None]];
        let targets = vec![full(vec![vec![0], vec![1]])];
        assert_eq!(
            pairs(sources, targets)?,
            vec![(vec![vec![0], vec![0]], vec![vec![0]])]
        );

        let sources = vec![vec![None, Some(vec![1])]];
        let targets = vec![vec![None, Some(vec![1, 1])], vec![None, Some(vec![1, 1])]];
        assert_eq!(pairs(sources, targets)?, vec![(vec![vec![1]], vec![vec![1, 1], vec![1, 1]])]);
        Ok(())
    }

    #[test]
    fn test_parallel_iter_different_line_counts() {
        let source = full(vec![vec![0], vec![1, 1], vec![2], vec![3, 3, 3]]);
        let target = full(vec![vec![0], vec![1, 1]]);
        let err = pairs(vec![source.clone(), source], vec![target]).unwrap_err();
        assert!(matches!(err, DataError::NotParallel(_)));
        assert_eq!(err.to_string(), DIFFERENT_LINE_COUNTS);

        // one line too many is detected as well
        let source = full(vec![vec![0], vec![1, 1], vec![2]]);
        let target = full(vec![vec![0], vec![1, 1]]);
        assert!(matches!(pairs(vec![source], vec![target]), Err(DataError::NotParallel(_))));
    }

    #[test]
    fn test_parallel_iter_not_token_parallel() {
        let sources = vec![full(vec![vec![0], vec![1, 1]]), full(vec![vec![0], vec![1]])];
        let targets = vec![full(vec![vec![0], vec![1, 1]])];
        let err = pairs(sources, targets).unwrap_err();
        assert!(err.to_string().starts_with("Source sequences are not token-parallel"));

        let sources = vec![full(vec![vec![0], vec![1]])];
        let targets = vec![full(vec![vec![0], vec![1, 1]]), full(vec![vec![0], vec![1]])];
        let err = pairs(sources, targets).unwrap_err();
        assert!(err.to_string().starts_with("Target sequences are not token-parallel"));
    }

    #[test]
    fn test_parallel_iter_with_alignment() -> Result<()> {
        let sources = streams(vec![vec![Some(vec![0]), Some(vec![1])], vec![Some(vec![2]), None]]);
        let targets = streams(vec![full(vec![vec![3], vec![4]])]);
        let alignments: AlignmentStream<'static> =
            Box::new(vec![Ok::<_, DataError>(vec![(0, 0)]), Ok(vec![(1, 1)])].into_iter());
        let samples = parallel_iter(sources, targets, Some(alignments)).collect::<Result<Vec<_>>>()?;
        assert_eq!(
            samples,
            vec![ParallelSample {
                source: vec![vec![0], vec![2]],
                target: vec![vec![3]],
                alignment: Some(vec![(0, 0)]),
            }]
        );

        let sources = streams(vec![full(vec![vec![0], vec![1]])]);
        let targets = streams(vec![full(vec![vec![3], vec![4]])]);
        let alignments: AlignmentStream<'static> = Box::new(vec![Ok::<_, DataError>(vec![(0, 0)])].into_iter());
        let err = parallel_iter(sources, targets, Some(alignments))
            .collect::<Result<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, DataError::AlignmentMismatch(_)));
        Ok(())
    }

    fn samples(sources: Vec<Vec<i32>>, targets: Vec<Vec<i32>>) -> Vec<Result<ParallelSample>> {
        sources
            .into_iter()
            .zip(targets)
            .map(|(s, t)| {
                Ok(ParallelSample {
                    source: vec![s],
                    target: vec![t],
                    alignment: None,
                })
            })
            .collect()
    }

    #[test]
    fn test_calculate_length_statistics() -> Result<()> {
        let stats = calculate_length_statistics(
            samples(vec![vec![1, 1], vec![1, 1]], vec![vec![1, 1, 1], vec![1, 1, 1]]),
            5,
            5,
        )?;
        assert_eq!(stats.num_sents, 2);
        assert!((stats.length_ratio_mean - 1.5).abs() < 1e-9);
        assert!(stats.length_ratio_std.abs() < 1e-9);

        let stats = calculate_length_statistics(
            samples(
                vec![vec![1, 1, 1], vec![1, 1], vec![3; 7]],
                vec![vec![1, 1, 1], vec![1], vec![1, 1, 1]],
            ),
            5,
            5,
        )?;
        assert_eq!(stats.num_sents, 2);
        assert!((stats.length_ratio_mean - 0.75).abs() < 1e-9);
        assert!((stats.length_ratio_std - 0.25).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_data_statistics_accumulator() {
        let buckets = vec![(3, 3), (5, 5)];
        let mut acc = DataStatisticsAccumulator::new(&buckets, 10, 12);
        acc.sequence_pair(&[4, 5, 3], &[2, 6, 3], Some(0));
        acc.sequence_pair(&[4, UNK_ID, 5, 3], &[2, 6, UNK_ID, 7, 3], Some(1));
        acc.sequence_pair(&[4; 9], &[4; 9], None);
        let stats = acc.statistics();

        assert_eq!(stats.num_sents, 2);
        assert_eq!(stats.num_discarded, 1);
        assert_eq!(stats.num_tokens_source, 7);
        assert_eq!(stats.num_tokens_target, 8);
        assert_eq!((stats.num_unks_source, stats.num_unks_target), (1, 1));
        assert_eq!((stats.max_observed_len_source, stats.max_observed_len_target), (4, 5));
        assert_eq!(stats.num_sents_per_bucket, vec![1, 1]);
        assert_eq!(stats.average_len_target_per_bucket, vec![Some(3.0), Some(5.0)]);
        assert_eq!(stats.length_ratio_stats_per_bucket[1], Some((1.25, 0.0)));
        assert!((stats.length_ratio_mean - 1.125).abs() < 1e-9);
        assert_eq!((stats.size_vocab_source, stats.size_vocab_target), (10, 12));
    }

    #[test]
    fn test_raw_parallel_dataset_loader() -> Result<()> {
        let buckets = vec![(3, 4), (5, 6)];
        let eop = 9;
        let pairs = vec![
            ParallelSample {
                source: vec![vec![9, 5, 3]],
                target: vec![vec![2, 6, 3]],
                alignment: Some(vec![(1, 1)]),
            },
            ParallelSample {
                source: vec![vec![4, 4, 9, 5, 3]],
                target: vec![vec![2, 6, 6, 3]],
                alignment: Some(vec![(0, 1), (1, 1)]),
            },
            ParallelSample {
                source: vec![vec![4; 8]],
                target: vec![vec![2, 3]],
                alignment: Some(vec![]),
            },
        ];
        let data = RawParallelDatasetLoader::new(&buckets, 1, 1, Some(eop)).load(&pairs)?;

        assert_eq!(data.get_bucket_counts(), vec![1, 1]);
        assert_eq!(data.source()[0].size(), vec![1, 3, 1]);
        assert_eq!(data.target()[1].size(), vec![1, 6, 1]);
        assert_eq!(tensor_to_vec::<i32>(&data.target()[1])?, vec![2, 6, 6, 3, PAD_ID, PAD_ID]);
        let prepended = data.prepended_source_length().unwrap();
        assert_eq!(tensor_to_vec::<i32>(&prepended[0])?, vec![1]);
        assert_eq!(tensor_to_vec::<i32>(&prepended[1])?, vec![3]);

        let alignments = data.alignment_matrix().unwrap();
        assert_eq!(alignments[0].num_columns(), 12);
        assert_eq!(alignments[0].columns(), &[4]);
        assert_eq!(alignments[1].columns(), &[5, 6]);
        assert_eq!(alignments[1].values(), &[0.5, 0.5]);
        Ok(())
    }

    #[test]
    fn test_loader_keeps_empty_buckets() -> Result<()> {
        let pairs = vec![ParallelSample {
            source: vec![vec![4, 3]],
            target: vec![vec![2, 5, 3]],
            alignment: None,
        }];
        let data = RawParallelDatasetLoader::new(&[(2, 3), (10, 10)], 1, 1, None).load(&pairs)?;
        assert_eq!(data.get_bucket_counts(), vec![1, 0]);
        assert_eq!(data.source()[1].size(), vec![0, 10, 1]);
        assert!(data.prepended_source_length().is_none());
        assert!(data.alignment_matrix().is_none());
        Ok(())
    }
}
