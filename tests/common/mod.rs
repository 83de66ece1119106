#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seq2seq_data::alignment::{create_alignment_matrix, AlignmentMatrix};
use seq2seq_data::batcher::define_bucket_batch_sizes;
use seq2seq_data::constants::{BOS_ID, EOS_ID, PAD_ID};
use seq2seq_data::dataset::token_tensor;
use seq2seq_data::{Batch, BatchType, Bucket, BucketBatchSize, ParallelDataSet, SampleIterator};
use tch::Tensor;

pub const MIN_WORD_ID: i32 = 4;
pub const MAX_WORD_ID: i32 = 50;

/// What the random dataset should carry besides source and target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extras {
    pub prepended_source_length: bool,
    pub alignment_matrix: bool,
    pub num_source_factors: usize,
    pub num_target_factors: usize,
}

impl Extras {
    pub fn all() -> Self {
        Self {
            prepended_source_length: true,
            alignment_matrix: true,
            num_source_factors: 2,
            num_target_factors: 2,
        }
    }

    pub fn none() -> Self {
        Self {
            num_source_factors: 1,
            num_target_factors: 1,
            ..Default::default()
        }
    }
}

fn words(rng: &mut StdRng, len: usize) -> Vec<i32> {
    (0..len).map(|_| rng.gen_range(MIN_WORD_ID..MAX_WORD_ID)).collect()
}

/// One padded sequence of exactly `padded_len` positions.
fn sequence(rng: &mut StdRng, padded_len: usize, with_bos: bool) -> Vec<i32> {
    let specials = 1 + usize::from(with_bos);
    let len = rng.gen_range(specials.max(1)..=padded_len);
    let mut seq = Vec::with_capacity(padded_len);
    if with_bos {
        seq.push(BOS_ID);
    }
    seq.extend(words(rng, len - specials));
    seq.push(EOS_ID);
    seq.resize(padded_len, PAD_ID);
    seq
}

/// Random bucketed dataset with `counts[b]` samples in bucket `b`.
///
/// Targets start with BOS and end with EOS; extra factors repeat the first factor
/// shifted by 100 outside of special symbols so that they stay token-parallel.
pub fn random_dataset(buckets: &[Bucket], counts: &[usize], extras: Extras, seed: u64) -> ParallelDataSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut source = vec![];
    let mut target = vec![];
    let mut prepended = vec![];
    let mut alignments = vec![];

    let with_factors = |seqs: &[Vec<i32>], num_factors: usize| -> Vec<i32> {
        seqs.iter()
            .flat_map(|seq| {
                seq.iter().flat_map(move |&id| {
                    (0..num_factors).map(move |f| if f == 0 || id < MIN_WORD_ID { id } else { id + 100 })
                })
            })
            .collect()
    };

    for (&(source_len, target_len), &count) in buckets.iter().zip(counts) {
        let sources: Vec<Vec<i32>> = (0..count).map(|_| sequence(&mut rng, source_len, false)).collect();
        let targets: Vec<Vec<i32>> = (0..count).map(|_| sequence(&mut rng, target_len, true)).collect();
        source.push(token_tensor(
            &with_factors(&sources, extras.num_source_factors),
            &[count as i64, source_len as i64, extras.num_source_factors as i64],
        ));
        target.push(token_tensor(
            &with_factors(&targets, extras.num_target_factors),
            &[count as i64, target_len as i64, extras.num_target_factors as i64],
        ));
        if extras.prepended_source_length {
            let lengths: Vec<i32> = (0..count).map(|_| rng.gen_range(0..source_len as i32)).collect();
            prepended.push(Tensor::from_slice(&lengths));
        }
        if extras.alignment_matrix {
            let rows: Vec<AlignmentMatrix> = (0..count)
                .map(|_| {
                    let points: Vec<(usize, usize)> = (0..rng.gen_range(0..4))
                        .map(|_| (rng.gen_range(0..source_len), rng.gen_range(0..target_len)))
                        .collect();
                    create_alignment_matrix(&points, (source_len, target_len)).unwrap()
                })
                .collect();
            let matrix = if rows.is_empty() {
                AlignmentMatrix::empty(source_len * target_len)
            } else {
                AlignmentMatrix::concat(&rows.iter().collect::<Vec<_>>()).unwrap()
            };
            alignments.push(matrix);
        }
    }
    ParallelDataSet::new(
        source,
        target,
        extras.prepended_source_length.then_some(prepended),
        extras.alignment_matrix.then_some(alignments),
    )
    .unwrap()
}

pub fn sentence_batch_sizes(buckets: &[Bucket], batch_size: usize) -> Vec<BucketBatchSize> {
    define_bucket_batch_sizes(
        buckets,
        batch_size,
        BatchType::Sentence,
        &vec![None; buckets.len()],
        1,
    )
    .unwrap()
}

pub fn assert_datasets_equal(a: &ParallelDataSet, b: &ParallelDataSet) {
    assert_eq!(a.get_bucket_counts(), b.get_bucket_counts());
    for bucket in 0..a.len() {
        assert!(a.source()[bucket].equal(&b.source()[bucket]), "source of bucket {bucket}");
        assert!(a.target()[bucket].equal(&b.target()[bucket]), "target of bucket {bucket}");
    }
    match (a.prepended_source_length(), b.prepended_source_length()) {
        (Some(x), Some(y)) => {
            for (x, y) in x.iter().zip(y) {
                assert!(x.equal(y));
            }
        }
        (None, None) => {}
        _ => panic!("only one dataset carries prepended source lengths"),
    }
    match (a.alignment_matrix(), b.alignment_matrix()) {
        (Some(x), Some(y)) => {
            for (x, y) in x.iter().zip(y) {
                assert_eq!(x, y);
            }
        }
        (None, None) => {}
        _ => panic!("only one dataset carries alignment matrices"),
    }
}

pub fn assert_batches_equal(a: &Batch, b: &Batch) {
    assert_eq!((a.samples, a.tokens), (b.samples, b.tokens));
    assert!(a.source.equal(&b.source));
    assert!(a.target.equal(&b.target));
    assert!(a.source_length.equal(&b.source_length));
    assert!(a.target_length.equal(&b.target_length));
    match (&a.prepended_source_length, &b.prepended_source_length) {
        (Some(x), Some(y)) => assert!(x.equal(y)),
        (None, None) => {}
        _ => panic!("only one batch carries prepended source lengths"),
    }
    let mut names: Vec<_> = a.labels.keys().collect();
    names.sort();
    let mut other: Vec<_> = b.labels.keys().collect();
    other.sort();
    assert_eq!(names, other);
    for name in names {
        assert!(a.labels[name].to_dense().equal(&b.labels[name].to_dense()), "label {name}");
    }
}

/// Remaining batches of the current epoch.
pub fn drain(iter: &mut dyn SampleIterator) -> Vec<Batch> {
    let mut batches = vec![];
    while iter.iter_next() {
        batches.push(iter.next().unwrap());
    }
    batches
}
