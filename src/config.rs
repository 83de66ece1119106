use crate::batcher::BatchType;
use crate::bucket::Bucket;
use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Corpus statistics gathered while bucketing the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStatistics {
    pub num_sents: usize,
    pub num_discarded: usize,
    pub num_tokens_source: usize,
    pub num_tokens_target: usize,
    pub num_unks_source: usize,
    pub num_unks_target: usize,
    pub max_observed_len_source: usize,
    pub max_observed_len_target: usize,
    pub size_vocab_source: usize,
    pub size_vocab_target: usize,
    pub length_ratio_mean: f64,
    pub length_ratio_std: f64,
    pub buckets: Vec<Bucket>,
    pub num_sents_per_bucket: Vec<usize>,
    /// `None` for buckets without sentences.
    pub average_len_target_per_bucket: Vec<Option<f64>>,
    /// `(mean, std)` of the length ratio, `None` for empty buckets.
    pub length_ratio_stats_per_bucket: Vec<Option<(f64, f64)>>,
}

/// Everything needed to rebuild the bucketing of a prepared data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub data_statistics: DataStatistics,
    pub max_seq_len_source: usize,
    pub max_seq_len_target: usize,
    pub num_source_factors: usize,
    pub num_target_factors: usize,
    pub eop_id: Option<i32>,
}

impl DataConfig {
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DataError::serialization(path, e.to_string()))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DataError::serialization(path, e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketingConfig {
    /// Longest source sequence, EOS included.
    pub max_seq_len_source: usize,
    /// Longest target sequence, BOS and EOS included.
    pub max_seq_len_target: usize,
    pub bucket_width: usize,
    pub bucket_scaling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub batch_type: BatchType,
    pub batch_sentences_multiple_of: usize,
    pub permute: bool,
    pub seed: u64,
}
