use crate::batch::Batch;
use crate::batcher::BucketBatchSize;
use crate::bucket::Bucket;
use crate::constants::{ITER_STATE_VERSION, SHARD_ITER_SUFFIX};
use crate::dataset::ParallelDataSet;
use crate::error::{ensure_config, DataError, Result};
use crate::iterator::{epoch_rng, ParallelSampleIter, SampleIterator};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const SHARD_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// On-disk checkpoint of a [`ShardedParallelSampleIter`]. The state of the active
/// shard's iterator lives next to it, in `<path>.sharditer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ShardedIteratorState {
    version: u32,
    epoch: u64,
    shards: Vec<PathBuf>,
    shard_index: usize,
}

/// Iterates over a corpus split into shard files, holding one shard in memory.
///
/// Every epoch visits each shard once, in a seeded random order that never starts
/// with the shard the previous epoch ended on. The next shard is loaded and filled
/// up as soon as the active one runs out of batches, and shards without a full
/// batch are passed over, so `iter_next` is false exactly when the epoch has no
/// batch left. A single shard is loaded once and then simply reset, which makes a
/// one-shard iterator behave exactly like a [`ParallelSampleIter`] over that shard.
#[derive(Debug)]
pub struct ShardedParallelSampleIter {
    shards: Vec<PathBuf>,
    buckets: Vec<Bucket>,
    bucket_batch_sizes: Vec<BucketBatchSize>,
    permute: bool,
    seed: u64,
    epoch: u64,
    shard_index: Option<usize>,
    shard_iter: Option<ParallelSampleIter>,
}

impl ShardedParallelSampleIter {
    pub fn new(
        shards: Vec<PathBuf>,
        buckets: &[Bucket],
        bucket_batch_sizes: &[BucketBatchSize],
        permute: bool,
        seed: u64,
    ) -> Result<Self> {
        ensure_config!(!shards.is_empty(), "At least one shard is required");
        ensure_config!(
            shards.iter().collect::<HashSet<_>>().len() == shards.len(),
            "Shard list contains duplicates"
        );
        ensure_config!(
            bucket_batch_sizes.len() == buckets.len(),
            "{} buckets but {} bucket batch sizes",
            buckets.len(),
            bucket_batch_sizes.len()
        );
        let mut iter = Self {
            shards,
            buckets: buckets.to_vec(),
            bucket_batch_sizes: bucket_batch_sizes.to_vec(),
            permute,
            seed,
            epoch: 0,
            shard_index: None,
            shard_iter: None,
        };
        iter.reset()?;
        Ok(iter)
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Visiting order of the shards in the current epoch.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    pub fn shard_index(&self) -> Option<usize> {
        self.shard_index
    }

    fn shard_seed(&self, shard_index: usize) -> u64 {
        // a lone shard is loaded once and then reset, so it keeps the base seed
        if self.shards.len() == 1 {
            return self.seed;
        }
        let position = (self.epoch - 1) * self.shards.len() as u64 + shard_index as u64;
        self.seed.wrapping_add(position.wrapping_mul(SHARD_SEED_STRIDE))
    }

    /// Releases the current shard, then loads and fills up the one at `shard_index`.
    fn load_shard(&mut self, shard_index: usize) -> Result<()> {
        self.shard_iter = None;
        self.shard_index = Some(shard_index);
        let path = &self.shards[shard_index];
        info!("Loading shard {}", path.display());
        let seed = self.shard_seed(shard_index);
        let dataset = ParallelDataSet::load(path)?.fill_up(&self.bucket_batch_sizes, seed)?;
        self.shard_iter = Some(ParallelSampleIter::new(
            dataset,
            &self.buckets,
            &self.bucket_batch_sizes,
            self.permute,
            seed,
        )?);
        Ok(())
    }

    /// Moves on from an exhausted shard until one with batches left is active, or
    /// the last shard of the epoch is.
    fn skip_exhausted_shards(&mut self) -> Result<()> {
        while let Some(index) = self.shard_index {
            if self.active()?.iter_next() || index + 1 >= self.shards.len() {
                break;
            }
            self.load_shard(index + 1)?;
        }
        Ok(())
    }

    fn active(&mut self) -> Result<&mut ParallelSampleIter> {
        self.shard_iter
            .as_mut()
            .ok_or_else(|| DataError::config("No shard loaded"))
    }
}

impl SampleIterator for ShardedParallelSampleIter {
    fn reset(&mut self) -> Result<()> {
        self.epoch += 1;
        if self.shards.len() > 1 {
            info!("Shuffling the shards");
            let mut rng = epoch_rng(self.seed, self.epoch);
            let current = self.shard_index.map(|i| self.shards[i].clone());
            let candidates: Vec<&PathBuf> = self
                .shards
                .iter()
                .filter(|shard| Some(*shard) != current.as_ref())
                .collect();
            let next = candidates
                .choose(&mut rng)
                .map(|shard| (*shard).clone())
                .ok_or_else(|| DataError::config("No shard to start the epoch with"))?;
            let mut remaining: Vec<PathBuf> = self.shards.iter().filter(|s| **s != next).cloned().collect();
            remaining.shuffle(&mut rng);
            self.shards = std::iter::once(next).chain(remaining).collect();
            self.load_shard(0)?;
        } else if self.shard_iter.is_none() {
            self.load_shard(0)?;
        } else {
            self.active()?.reset()?;
        }
        self.skip_exhausted_shards()
    }

    fn iter_next(&self) -> bool {
        self.shard_iter.as_ref().map_or(false, SampleIterator::iter_next)
    }

    fn next(&mut self) -> Result<Batch> {
        let batch = self.active()?.next()?;
        self.skip_exhausted_shards()?;
        Ok(batch)
    }

    fn save_state(&self, path: &Path) -> Result<()> {
        let (Some(shard_index), Some(shard_iter)) = (self.shard_index, &self.shard_iter) else {
            return Err(DataError::config("No shard loaded"));
        };
        let state = ShardedIteratorState {
            version: ITER_STATE_VERSION,
            epoch: self.epoch,
            shards: self.shards.clone(),
            shard_index,
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &state)?;
        writer.flush()?;
        shard_iter.save_state(&shard_iter_path(path))
    }

    fn load_state(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| DataError::serialization(path, e.to_string()))?;
        let state: ShardedIteratorState = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DataError::serialization(path, e.to_string()))?;
        if state.version != ITER_STATE_VERSION {
            return Err(DataError::serialization(
                path,
                format!("unknown iterator state version {}", state.version),
            ));
        }
        let configured: HashSet<&PathBuf> = self.shards.iter().collect();
        let saved: HashSet<&PathBuf> = state.shards.iter().collect();
        ensure_config!(
            state.shards.len() == self.shards.len() && saved == configured,
            "Saved shard list does not match the shards of this iterator"
        );
        ensure_config!(
            state.shard_index < state.shards.len() && state.epoch > 0,
            "Saved shard index {} out of range",
            state.shard_index
        );

        self.shards = state.shards;
        self.epoch = state.epoch;
        self.load_shard(state.shard_index)?;
        self.active()?.load_state(&shard_iter_path(path))?;
        self.skip_exhausted_shards()
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

fn shard_iter_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SHARD_ITER_SUFFIX);
    PathBuf::from(name)
}
