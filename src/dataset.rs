use crate::alignment::AlignmentMatrix;
use crate::batcher::BucketBatchSize;
use crate::constants::{SHARD_FORMAT_CURRENT, SHARD_FORMAT_LEGACY};
use crate::error::{ensure_config, DataError, Result};
use crate::permutation::Permutation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tch::{kind::Element, Tensor};
use tracing::{debug, info};

const FORMAT_VERSION_KEY: &str = "format.version";
const BUCKET_COUNTS_KEY: &str = "bucket_counts";

/// Bucketed parallel data, ready for batching.
///
/// For every bucket `b`:
/// - `source[b]`: `(samples, source_len, source_factors)` int tensor
/// - `target[b]`: `(samples, target_len, target_factors)` int tensor
/// - `prepended_source_length[b]`: `(samples,)` int tensor, when present
/// - `alignment_matrix[b]`: one sparse row per sample, when present
///
/// Rows at the same offset across these arrays form one training pair. A dataset
/// is never modified after construction: [`ParallelDataSet::fill_up`] and
/// [`ParallelDataSet::permute`] return new datasets that share the tensors of
/// buckets they do not touch. Cloning is cheap for the same reason.
#[derive(Debug)]
pub struct ParallelDataSet {
    source: Vec<Tensor>,
    target: Vec<Tensor>,
    prepended_source_length: Option<Vec<Tensor>>,
    alignment_matrix: Option<Vec<Arc<AlignmentMatrix>>>,
}

impl Clone for ParallelDataSet {
    fn clone(&self) -> Self {
        Self {
            source: shallow_clone_all(&self.source),
            target: shallow_clone_all(&self.target),
            prepended_source_length: self
                .prepended_source_length
                .as_deref()
                .map(shallow_clone_all),
            alignment_matrix: self.alignment_matrix.clone(),
        }
    }
}

fn shallow_clone_all(tensors: &[Tensor]) -> Vec<Tensor> {
    tensors.iter().map(Tensor::shallow_clone).collect()
}

impl ParallelDataSet {
    pub fn new(
        source: Vec<Tensor>,
        target: Vec<Tensor>,
        prepended_source_length: Option<Vec<Tensor>>,
        alignment_matrix: Option<Vec<AlignmentMatrix>>,
    ) -> Result<Self> {
        ensure_config!(
            source.len() == target.len(),
            "Number of buckets for source ({}) and target ({}) do not match",
            source.len(),
            target.len()
        );
        if let Some(lengths) = &prepended_source_length {
            ensure_config!(
                lengths.len() == source.len(),
                "Number of buckets for prepended source lengths ({}) and source ({}) do not match",
                lengths.len(),
                source.len()
            );
        }
        if let Some(matrices) = &alignment_matrix {
            ensure_config!(
                matrices.len() == source.len(),
                "Number of buckets for alignment matrices ({}) and source ({}) do not match",
                matrices.len(),
                source.len()
            );
        }

        for (bucket, (source, target)) in source.iter().zip(&target).enumerate() {
            ensure_config!(
                source.dim() == 3 && target.dim() == 3,
                "Bucket {bucket}: source and target must be (samples, length, factors), got {:?} and {:?}",
                source.size(),
                target.size()
            );
            let num_samples = source.size()[0];
            ensure_config!(
                target.size()[0] == num_samples,
                "Bucket {bucket}: {num_samples} source samples but {} target samples",
                target.size()[0]
            );
            if let Some(lengths) = &prepended_source_length {
                ensure_config!(
                    lengths[bucket].size() == [num_samples],
                    "Bucket {bucket}: {num_samples} source samples but prepended source lengths of shape {:?}",
                    lengths[bucket].size()
                );
            }
            if let Some(matrices) = &alignment_matrix {
                ensure_config!(
                    matrices[bucket].num_rows() as i64 == num_samples,
                    "Bucket {bucket}: {num_samples} source samples but {} alignment matrix rows",
                    matrices[bucket].num_rows()
                );
            }
        }

        Ok(Self {
            source,
            target,
            prepended_source_length,
            alignment_matrix: alignment_matrix.map(|m| m.into_iter().map(Arc::new).collect()),
        })
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &[Tensor] {
        &self.source
    }

    pub fn target(&self) -> &[Tensor] {
        &self.target
    }

    pub fn prepended_source_length(&self) -> Option<&[Tensor]> {
        self.prepended_source_length.as_deref()
    }

    pub fn alignment_matrix(&self) -> Option<&[Arc<AlignmentMatrix>]> {
        self.alignment_matrix.as_deref()
    }

    pub fn get_bucket_counts(&self) -> Vec<usize> {
        self.source.iter().map(|s| s.size()[0] as usize).collect()
    }

    /// The legacy format only carries source and target arrays; it exists so that
    /// older readers keep working, and drops prepended lengths and alignments.
    pub fn save(&self, path: impl AsRef<Path>, use_legacy_format: bool) -> Result<()> {
        let path = path.as_ref();
        let version = if use_legacy_format {
            SHARD_FORMAT_LEGACY
        } else {
            SHARD_FORMAT_CURRENT
        };
        let counts: Vec<i64> = self.get_bucket_counts().iter().map(|&c| c as i64).collect();

        let mut named: Vec<(String, Tensor)> = vec![
            (FORMAT_VERSION_KEY.to_string(), Tensor::from_slice(&[version])),
            (BUCKET_COUNTS_KEY.to_string(), Tensor::from_slice(&counts)),
        ];
        for bucket in 0..self.len() {
            named.push((format!("source.{bucket}"), self.source[bucket].shallow_clone()));
            named.push((format!("target.{bucket}"), self.target[bucket].shallow_clone()));
            if use_legacy_format {
                continue;
            }
            if let Some(lengths) = &self.prepended_source_length {
                named.push((
                    format!("prepended_source_length.{bucket}"),
                    lengths[bucket].shallow_clone(),
                ));
            }
            if let Some(matrices) = &self.alignment_matrix {
                let matrix = &matrices[bucket];
                let prefix = format!("alignment_matrix.{bucket}");
                named.push((format!("{prefix}.row_offsets"), Tensor::from_slice(matrix.row_offsets())));
                named.push((format!("{prefix}.columns"), Tensor::from_slice(matrix.columns())));
                named.push((format!("{prefix}.values"), Tensor::from_slice(matrix.values())));
                named.push((
                    format!("{prefix}.shape"),
                    Tensor::from_slice(&[matrix.num_rows() as i64, matrix.num_columns() as i64]),
                ));
            }
        }
        Tensor::save_multi(&named, path)?;
        debug!("Saved {} buckets to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a shard file written by [`ParallelDataSet::save`], in either format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut entries: HashMap<String, Tensor> = Tensor::load_multi(path)
            .map_err(|e| DataError::serialization(path, e.to_string()))?
            .into_iter()
            .collect();

        let version = entries
            .remove(FORMAT_VERSION_KEY)
            .ok_or_else(|| DataError::serialization(path, "missing format version"))
            .and_then(|t| read_scalar(path, &t))?;
        let legacy = match version {
            SHARD_FORMAT_LEGACY => true,
            SHARD_FORMAT_CURRENT => false,
            other => {
                return Err(DataError::serialization(
                    path,
                    format!("unknown shard format version {other}"),
                ))
            }
        };
        let counts: Vec<i64> = take(path, &mut entries, BUCKET_COUNTS_KEY)
            .and_then(|t| tensor_to_vec(&t).map_err(|e| DataError::serialization(path, e.to_string())))?;

        let mut source = Vec::with_capacity(counts.len());
        let mut target = Vec::with_capacity(counts.len());
        let mut lengths = Vec::with_capacity(counts.len());
        let mut matrices = Vec::with_capacity(counts.len());
        for (bucket, &count) in counts.iter().enumerate() {
            let bucket_source = take(path, &mut entries, &format!("source.{bucket}"))?;
            if bucket_source.size().first() != Some(&count) {
                return Err(DataError::serialization(
                    path,
                    format!("bucket {bucket} holds {:?} samples, header says {count}", bucket_source.size()),
                ));
            }
            source.push(bucket_source);
            target.push(take(path, &mut entries, &format!("target.{bucket}"))?);
            if legacy {
                continue;
            }
            if let Some(length) = entries.remove(&format!("prepended_source_length.{bucket}")) {
                lengths.push(length);
            }
            let prefix = format!("alignment_matrix.{bucket}");
            if let Some(shape) = entries.remove(&format!("{prefix}.shape")) {
                matrices.push(read_alignment_matrix(path, &mut entries, &prefix, &shape)?);
            }
        }

        let optional = |found: usize, what: &str| -> Result<bool> {
            match found {
                0 => Ok(false),
                n if n == counts.len() => Ok(true),
                n => Err(DataError::serialization(
                    path,
                    format!("{what} present for {n} of {} buckets", counts.len()),
                )),
            }
        };
        let has_lengths = optional(lengths.len(), "prepended source lengths")?;
        let has_matrices = optional(matrices.len(), "alignment matrices")?;

        Self::new(
            source,
            target,
            has_lengths.then_some(lengths),
            has_matrices.then_some(matrices),
        )
    }

    /// Completes the last batch of every bucket by resampling, with replacement,
    /// pairs already in that bucket.
    ///
    /// Afterwards every bucket count is a multiple of its batch size. Buckets that
    /// are already complete, and empty buckets, are returned unchanged.
    pub fn fill_up(&self, bucket_batch_sizes: &[BucketBatchSize], seed: u64) -> Result<Self> {
        ensure_config!(
            bucket_batch_sizes.len() == self.len(),
            "Number of bucket batch sizes ({}) does not match number of buckets ({})",
            bucket_batch_sizes.len(),
            self.len()
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let mut filled = self.clone();
        let mut num_filled = 0;

        for (bucket, bucket_batch_size) in bucket_batch_sizes.iter().enumerate() {
            let num_samples = self.source[bucket].size()[0] as usize;
            let batch_size = bucket_batch_size.batch_size;
            if num_samples == 0 || num_samples % batch_size == 0 {
                continue;
            }
            let rest = batch_size - num_samples % batch_size;
            let desired: Vec<i64> = (0..rest)
                .map(|_| rng.gen_range(0..num_samples) as i64)
                .collect();
            let desired_indices = Tensor::from_slice(&desired);
            num_filled += rest;

            let append = |t: &Tensor| Tensor::cat(&[t, &t.index_select(0, &desired_indices)], 0);
            filled.source[bucket] = append(&self.source[bucket]);
            filled.target[bucket] = append(&self.target[bucket]);
            if let Some(lengths) = filled.prepended_source_length.as_mut() {
                lengths[bucket] = append(&lengths[bucket]);
            }
            if let Some(matrices) = filled.alignment_matrix.as_mut() {
                let matrix: &AlignmentMatrix = &matrices[bucket];
                let extra = matrix.select_rows(&desired);
                let extended = AlignmentMatrix::concat(&[matrix, &extra])?;
                matrices[bucket] = Arc::new(extended);
            }
        }
        if num_filled > 0 {
            info!("Filled up buckets with {} resampled pairs", num_filled);
        }
        Ok(filled)
    }

    /// Reorders the samples of every bucket by the given per-bucket permutation.
    ///
    /// All parallel arrays of a bucket are permuted together. Empty buckets are
    /// passed through; their permutation is the one-element sentinel.
    pub fn permute(&self, permutations: &[Permutation]) -> Result<Self> {
        ensure_config!(
            permutations.len() == self.len(),
            "Number of permutations ({}) does not match number of buckets ({})",
            permutations.len(),
            self.len()
        );
        let mut permuted = self.clone();
        for (bucket, permutation) in permutations.iter().enumerate() {
            let num_samples = self.source[bucket].size()[0] as usize;
            if num_samples == 0 {
                continue;
            }
            ensure_config!(
                permutation.len() == num_samples,
                "Bucket {bucket}: permutation of length {} for {num_samples} samples",
                permutation.len()
            );
            let indices = permutation.to_tensor();
            permuted.source[bucket] = self.source[bucket].index_select(0, &indices);
            permuted.target[bucket] = self.target[bucket].index_select(0, &indices);
            if let Some(lengths) = permuted.prepended_source_length.as_mut() {
                lengths[bucket] = lengths[bucket].index_select(0, &indices);
            }
            if let Some(matrices) = permuted.alignment_matrix.as_mut() {
                matrices[bucket] = Arc::new(matrices[bucket].select_rows(permutation.as_slice()));
            }
        }
        Ok(permuted)
    }
}

fn take(path: &Path, entries: &mut HashMap<String, Tensor>, key: &str) -> Result<Tensor> {
    entries
        .remove(key)
        .ok_or_else(|| DataError::serialization(path, format!("missing entry '{key}'")))
}

fn read_scalar(path: &Path, tensor: &Tensor) -> Result<i64> {
    match tensor_to_vec::<i64>(tensor)?.as_slice() {
        [value] => Ok(*value),
        other => Err(DataError::serialization(
            path,
            format!("expected a single value, found {} values", other.len()),
        )),
    }
}

fn read_alignment_matrix(
    path: &Path,
    entries: &mut HashMap<String, Tensor>,
    prefix: &str,
    shape: &Tensor,
) -> Result<AlignmentMatrix> {
    let shape: Vec<i64> = tensor_to_vec(shape)?;
    let &[rows, num_columns] = shape.as_slice() else {
        return Err(DataError::serialization(path, format!("{prefix}: bad shape {shape:?}")));
    };
    let row_offsets: Vec<i64> = tensor_to_vec(&take(path, entries, &format!("{prefix}.row_offsets"))?)?;
    let columns: Vec<i64> = tensor_to_vec(&take(path, entries, &format!("{prefix}.columns"))?)?;
    let values: Vec<f32> = tensor_to_vec(&take(path, entries, &format!("{prefix}.values"))?)?;
    let matrix = AlignmentMatrix::from_parts(num_columns as usize, row_offsets, columns, values)
        .map_err(|e| DataError::serialization(path, format!("{prefix}: {e}")))?;
    if matrix.num_rows() as i64 != rows {
        return Err(DataError::serialization(
            path,
            format!("{prefix}: {} rows stored, shape says {rows}", matrix.num_rows()),
        ));
    }
    Ok(matrix)
}

pub fn tensor_to_vec<T: Element + Copy>(tensor: &Tensor) -> Result<Vec<T>> {
    Ok(Vec::<T>::try_from(&tensor.f_reshape(&[-1])?)?)
}

pub fn token_tensor(data: &[i32], shape: &[i64]) -> Tensor {
    Tensor::from_slice(data).reshape(shape)
}
