//! Checkpointable batch iteration over a bucketed dataset.
//!
//! An iterator moves through three states: not started (freshly reset, nothing
//! handed out), mid-epoch, and exhausted (`iter_next()` is false). `reset()` starts a
//! new epoch from any state. The whole state, including the random sample order of
//! every bucket, can be written to a checkpoint and restored in another process;
//! the restored iterator yields exactly the batches the original would have.

use crate::batch::{create_batch_from_parallel_sample, create_target_and_shifted_label_sequences, Batch};
use crate::batcher::{get_batch_indices, BucketBatchSize};
use crate::bucket::Bucket;
use crate::constants::ITER_STATE_VERSION;
use crate::dataset::ParallelDataSet;
use crate::error::{ensure_config, DataError, Result};
use crate::permutation::{get_permutations, Permutation};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Interface shared by the in-memory and the sharded iterator.
pub trait SampleIterator {
    /// Starts a new epoch with a fresh, seeded sample order.
    fn reset(&mut self) -> Result<()>;

    /// Whether another batch is available in this epoch.
    fn iter_next(&self) -> bool;

    /// The next batch, or [`DataError::Exhausted`] at the end of the epoch.
    fn next(&mut self) -> Result<Batch>;

    fn save_state(&self, path: &Path) -> Result<()>;

    fn load_state(&mut self, path: &Path) -> Result<()>;

    /// Number of resets so far; construction counts as the first.
    fn epoch(&self) -> u64;
}

pub(crate) fn epoch_rng(seed: u64, epoch: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(epoch))
}

/// On-disk checkpoint of a [`ParallelSampleIter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorState {
    pub version: u32,
    pub epoch: u64,
    pub batch_indices: Vec<(usize, usize)>,
    pub curr_batch_index: usize,
    pub permutations: Vec<Permutation>,
    pub inverse_permutations: Vec<Permutation>,
}

impl IteratorState {
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DataError::serialization(path, e.to_string()))?;
        let state: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DataError::serialization(path, e.to_string()))?;
        if state.version != ITER_STATE_VERSION {
            return Err(DataError::serialization(
                path,
                format!("unknown iterator state version {}", state.version),
            ));
        }
        Ok(state)
    }
}

/// Hands out the batches of one in-memory dataset in a random but reproducible
/// order.
///
/// Every epoch shuffles the order of the batches and, independently, the order of
/// the samples inside each bucket. Both are derived from `seed` and the epoch
/// number only.
#[derive(Debug)]
pub struct ParallelSampleIter {
    data: ParallelDataSet,
    buckets: Vec<Bucket>,
    bucket_batch_sizes: Vec<BucketBatchSize>,
    permute: bool,
    seed: u64,
    epoch: u64,
    batch_indices: Vec<(usize, usize)>,
    curr_batch_index: usize,
    data_permutations: Vec<Permutation>,
    inverse_data_permutations: Vec<Permutation>,
}

impl ParallelSampleIter {
    pub fn new(
        data: ParallelDataSet,
        buckets: &[Bucket],
        bucket_batch_sizes: &[BucketBatchSize],
        permute: bool,
        seed: u64,
    ) -> Result<Self> {
        ensure_config!(!buckets.is_empty(), "No buckets defined");
        ensure_config!(
            data.len() == buckets.len() && bucket_batch_sizes.len() == buckets.len(),
            "Dataset has {} buckets, iterator was given {} buckets and {} batch sizes",
            data.len(),
            buckets.len(),
            bucket_batch_sizes.len()
        );
        let batch_indices = get_batch_indices(&data, bucket_batch_sizes);
        let identities: Vec<Permutation> = data
            .get_bucket_counts()
            .into_iter()
            .map(Permutation::identity)
            .collect();

        let mut iter = Self {
            data,
            buckets: buckets.to_vec(),
            bucket_batch_sizes: bucket_batch_sizes.to_vec(),
            permute,
            seed,
            epoch: 0,
            batch_indices,
            curr_batch_index: 0,
            data_permutations: identities.clone(),
            inverse_data_permutations: identities,
        };
        iter.reset()?;
        Ok(iter)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn bucket_batch_sizes(&self) -> &[BucketBatchSize] {
        &self.bucket_batch_sizes
    }

    pub fn num_batches(&self) -> usize {
        self.batch_indices.len()
    }

    /// `(bucket, offset)` of the batch the next call to `next()` returns.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.batch_indices.get(self.curr_batch_index).copied()
    }

    pub fn state(&self) -> IteratorState {
        IteratorState {
            version: ITER_STATE_VERSION,
            epoch: self.epoch,
            batch_indices: self.batch_indices.clone(),
            curr_batch_index: self.curr_batch_index,
            permutations: self.data_permutations.clone(),
            inverse_permutations: self.inverse_data_permutations.clone(),
        }
    }

    /// Replaces the current position and sample order with `state`.
    pub fn restore(&mut self, state: IteratorState) -> Result<()> {
        let counts = self.data.get_bucket_counts();
        ensure_config!(
            state.permutations.len() == counts.len() && state.inverse_permutations.len() == counts.len(),
            "Iterator state holds permutations for {} buckets, dataset has {}",
            state.permutations.len(),
            counts.len()
        );
        for (bucket, (p, count)) in state.permutations.iter().zip(&counts).enumerate() {
            ensure_config!(
                p.len() == (*count).max(1) && p.is_valid() && state.inverse_permutations[bucket] == p.inverse(),
                "Iterator state: invalid permutation for bucket {bucket} with {count} samples"
            );
        }
        ensure_config!(
            state.curr_batch_index <= state.batch_indices.len()
                && state.batch_indices.iter().all(|&(bucket, start)| {
                    bucket < counts.len()
                        && start + self.bucket_batch_sizes[bucket].batch_size <= counts[bucket]
                }),
            "Iterator state does not match the dataset: batch schedule out of range"
        );

        // back to the original order, then into the restored one
        let original = self.data.permute(&self.inverse_data_permutations)?;
        self.data = original.permute(&state.permutations)?;
        self.data_permutations = state.permutations;
        self.inverse_data_permutations = state.inverse_permutations;
        self.batch_indices = state.batch_indices;
        self.curr_batch_index = state.curr_batch_index;
        self.epoch = state.epoch;
        Ok(())
    }
}

impl SampleIterator for ParallelSampleIter {
    fn reset(&mut self) -> Result<()> {
        self.epoch += 1;
        self.curr_batch_index = 0;
        if self.permute {
            let mut rng = epoch_rng(self.seed, self.epoch);
            self.batch_indices.shuffle(&mut rng);
            let original = self.data.permute(&self.inverse_data_permutations)?;
            let (permutations, inverse_permutations) =
                get_permutations(&original.get_bucket_counts(), rng.gen());
            self.data = original.permute(&permutations)?;
            self.data_permutations = permutations;
            self.inverse_data_permutations = inverse_permutations;
        }
        debug!(
            "Epoch {}: {} batches over {} buckets",
            self.epoch,
            self.batch_indices.len(),
            self.buckets.len()
        );
        Ok(())
    }

    fn iter_next(&self) -> bool {
        self.curr_batch_index != self.batch_indices.len()
    }

    fn next(&mut self) -> Result<Batch> {
        let (bucket, start) = self.position().ok_or(DataError::Exhausted)?;
        self.curr_batch_index += 1;
        let batch_size = self.bucket_batch_sizes[bucket].batch_size as i64;
        let start = start as i64;

        let source = self.data.source()[bucket].narrow(0, start, batch_size);
        let (target, label) =
            create_target_and_shifted_label_sequences(&self.data.target()[bucket].narrow(0, start, batch_size));
        let prepended_source_length = self
            .data
            .prepended_source_length()
            .map(|lengths| lengths[bucket].narrow(0, start, batch_size));
        let alignment_matrix = self
            .data
            .alignment_matrix()
            .map(|matrices| matrices[bucket].narrow(start as usize, batch_size as usize));
        create_batch_from_parallel_sample(source, target, label, prepended_source_length, alignment_matrix)
    }

    fn save_state(&self, path: &Path) -> Result<()> {
        self.state().save(path)
    }

    fn load_state(&mut self, path: &Path) -> Result<()> {
        let state = IteratorState::load(path)?;
        self.restore(state)
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}
