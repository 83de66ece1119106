use crate::bucket::Bucket;
use crate::dataset::ParallelDataSet;
use crate::error::{ensure_config, DataError, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// How the nominal batch size is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchType {
    Sentence,
    /// Roughly `batch_size` target words per batch, from the average target length
    /// of each bucket.
    Word,
    /// At most `batch_size` padded target words per batch.
    MaxWord,
}

impl FromStr for BatchType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sentence" => Ok(BatchType::Sentence),
            "word" => Ok(BatchType::Word),
            "max-word" => Ok(BatchType::MaxWord),
            other => Err(DataError::config(format!("Unknown batch type: {other}"))),
        }
    }
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchType::Sentence => "sentence",
            BatchType::Word => "word",
            BatchType::MaxWord => "max-word",
        })
    }
}

/// Batch size of one bucket, frozen for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketBatchSize {
    pub bucket: Bucket,
    /// Number of sentence pairs per batch, always >= 1.
    pub batch_size: usize,
    pub average_target_words_per_batch: f64,
}

/// Computes the number of sentence pairs per batch for every bucket.
///
/// `data_target_average_len` holds the observed average target length per bucket;
/// `None` entries fall back to the padded bucket length. All policies round to a
/// multiple of `batch_sentences_multiple_of`; a sentence batch size below the
/// multiple becomes 1.
pub fn define_bucket_batch_sizes(
    buckets: &[Bucket],
    batch_size: usize,
    batch_type: BatchType,
    data_target_average_len: &[Option<f64>],
    batch_sentences_multiple_of: usize,
) -> Result<Vec<BucketBatchSize>> {
    ensure_config!(!buckets.is_empty(), "No buckets defined");
    ensure_config!(
        data_target_average_len.len() == buckets.len(),
        "Number of average target lengths ({}) does not match number of buckets ({})",
        data_target_average_len.len(),
        buckets.len()
    );
    ensure_config!(batch_size > 0, "Batch size must be positive");
    let multiple = batch_sentences_multiple_of.max(1);

    let mut largest_total_num_words = 0;
    let mut bucket_batch_sizes = Vec::with_capacity(buckets.len());
    for (&bucket, average_len) in buckets.iter().zip(data_target_average_len) {
        // target/label length with padding
        let padded_seq_len = bucket.1;
        let average_seq_len = average_len.unwrap_or(padded_seq_len as f64);

        let batch_size_seq = match batch_type {
            BatchType::Sentence => ((batch_size / multiple) * multiple).max(1),
            BatchType::Word => {
                ensure_config!(
                    padded_seq_len <= batch_size,
                    "Word batch size must cover sequence lengths for all buckets: ({padded_seq_len} > {batch_size})"
                );
                let per_multiple = (batch_size as f64 / average_seq_len) / multiple as f64;
                multiple * (per_multiple.round_ties_even() as usize).max(1)
            }
            BatchType::MaxWord => {
                ensure_config!(
                    padded_seq_len <= batch_size,
                    "Word batch size must cover sequence lengths for all buckets: ({padded_seq_len} > {batch_size})"
                );
                let max_seqs = batch_size / padded_seq_len;
                ((max_seqs / multiple) * multiple).max(multiple)
            }
        };

        largest_total_num_words = largest_total_num_words.max(batch_size_seq * padded_seq_len);
        bucket_batch_sizes.push(BucketBatchSize {
            bucket,
            batch_size: batch_size_seq,
            average_target_words_per_batch: batch_size_seq as f64 * average_seq_len,
        });
    }

    info!(
        "Largest bucket batch size: {} sentences, largest padded batch: {} target words",
        bucket_batch_sizes.iter().map(|b| b.batch_size).max().unwrap_or(0),
        largest_total_num_words
    );
    info!(
        "Bucket batch sizes ({}): {}",
        batch_type,
        bucket_batch_sizes
            .iter()
            .map(|b| format!("{:?}:{}", b.bucket, b.batch_size))
            .join(" ")
    );
    Ok(bucket_batch_sizes)
}

/// `(bucket_index, start_offset)` of every full batch in the dataset, bucket by
/// bucket. Samples that do not fill a last batch are ignored; fill the dataset up
/// first to use them.
pub fn get_batch_indices(
    data: &ParallelDataSet,
    bucket_batch_sizes: &[BucketBatchSize],
) -> Vec<(usize, usize)> {
    let mut indices = vec![];
    for (bucket_index, (num_samples, bucket_batch_size)) in data
        .get_bucket_counts()
        .into_iter()
        .zip(bucket_batch_sizes)
        .enumerate()
    {
        let batch_size = bucket_batch_size.batch_size;
        let rest = num_samples % batch_size;
        if rest > 0 {
            info!(
                "Ignoring {} samples from bucket {:?} with {} samples due to incomplete batch",
                rest, bucket_batch_size.bucket, num_samples
            );
        }
        indices.extend(
            (0..num_samples - rest)
                .step_by(batch_size)
                .map(|start| (bucket_index, start)),
        );
    }
    indices
}
