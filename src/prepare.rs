//! Entry points: turning corpus files into batch iterators, either in memory or
//! through a prepared directory of shard files.

use crate::alignment::AlignmentMatrixReader;
use crate::batcher::{define_bucket_batch_sizes, BucketBatchSize};
use crate::bucket::{define_parallel_buckets, get_parallel_bucket, log_buckets, Bucket};
use crate::config::{BatchingConfig, BucketingConfig, DataConfig, DataStatistics};
use crate::constants::{shard_name, DATA_CONFIG, DATA_VERSION, PREPARED_DATA_VERSION};
use crate::corpus::{
    calculate_length_statistics, log_statistics, parallel_iter, AlignmentStream,
    DataStatisticsAccumulator, ParallelIter, ParallelSample, RawParallelDatasetLoader,
    SequenceStream,
};
use crate::error::{ensure_config, DataError, Result};
use crate::iterator::ParallelSampleIter;
use crate::sharded::ShardedParallelSampleIter;
use crate::token::{SequenceReader, Vocabulary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::borrow::Borrow;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Files of one parallel corpus: one file per factor on each side and an
/// optional word alignment file.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusFiles {
    pub sources: Vec<PathBuf>,
    pub targets: Vec<PathBuf>,
    pub alignment: Option<PathBuf>,
}

impl CorpusFiles {
    /// Opens all files as one stream of sentence pairs. Source sequences get an EOS
    /// symbol, target sequences a BOS and an EOS symbol.
    pub fn open<'v>(
        &self,
        source_vocabs: &'v [Vocabulary],
        target_vocabs: &'v [Vocabulary],
    ) -> Result<ParallelIter<'v>> {
        ensure_config!(
            !self.sources.is_empty() && !self.targets.is_empty(),
            "At least one source and one target file are required"
        );
        ensure_config!(
            self.sources.len() == source_vocabs.len(),
            "{} source files but {} source vocabularies",
            self.sources.len(),
            source_vocabs.len()
        );
        ensure_config!(
            self.targets.len() == target_vocabs.len(),
            "{} target files but {} target vocabularies",
            self.targets.len(),
            target_vocabs.len()
        );
        let sources = self
            .sources
            .iter()
            .zip(source_vocabs)
            .map(|(path, vocab)| {
                SequenceReader::new(path, Some(vocab), false, true)
                    .map(|reader| Box::new(reader) as SequenceStream<'v>)
            })
            .collect::<Result<Vec<_>>>()?;
        let targets = self
            .targets
            .iter()
            .zip(target_vocabs)
            .map(|(path, vocab)| {
                SequenceReader::new(path, Some(vocab), true, true)
                    .map(|reader| Box::new(reader) as SequenceStream<'v>)
            })
            .collect::<Result<Vec<_>>>()?;
        let alignments = match &self.alignment {
            Some(path) => Some(Box::new(AlignmentMatrixReader::new(path)?) as AlignmentStream<'v>),
            None => None,
        };
        Ok(parallel_iter(sources, targets, alignments))
    }
}

/// Buckets following the length ratio observed on the pairs that fit the limits.
fn define_corpus_buckets<I, S>(samples: I, bucketing: &BucketingConfig) -> Result<Vec<Bucket>>
where
    I: IntoIterator<Item = Result<S>>,
    S: Borrow<ParallelSample>,
{
    let length_statistics = calculate_length_statistics(
        samples,
        bucketing.max_seq_len_source,
        bucketing.max_seq_len_target,
    )?;
    ensure_config!(
        length_statistics.num_sents > 0,
        "No sentence pair fits the maximum lengths ({}, {})",
        bucketing.max_seq_len_source,
        bucketing.max_seq_len_target
    );
    info!(
        "{} sequences within the maximum lengths, mean length ratio {:.2} (+-{:.2})",
        length_statistics.num_sents,
        length_statistics.length_ratio_mean,
        length_statistics.length_ratio_std
    );
    let buckets = define_parallel_buckets(
        bucketing.max_seq_len_source,
        bucketing.max_seq_len_target,
        bucketing.bucket_width,
        bucketing.bucket_scaling,
        length_statistics.length_ratio_mean,
    );
    log_buckets(&buckets);
    Ok(buckets)
}

fn accumulate_statistics<I, S>(
    samples: I,
    buckets: &[Bucket],
    source_vocabs: &[Vocabulary],
    target_vocabs: &[Vocabulary],
) -> Result<DataStatistics>
where
    I: IntoIterator<Item = Result<S>>,
    S: Borrow<ParallelSample>,
{
    let mut accumulator = DataStatisticsAccumulator::new(
        buckets,
        source_vocabs.first().map_or(0, Vocabulary::size),
        target_vocabs.first().map_or(0, Vocabulary::size),
    );
    for sample in samples {
        let sample = sample?;
        let sample = sample.borrow();
        let bucket = get_parallel_bucket(buckets, sample.source_len(), sample.target_len());
        accumulator.sequence_pair(&sample.source[0], &sample.target[0], bucket.map(|(i, _)| i));
    }
    let statistics = accumulator.statistics();
    log_statistics(&statistics);
    Ok(statistics)
}

fn bucket_batch_sizes(
    statistics: &DataStatistics,
    batching: &BatchingConfig,
) -> Result<Vec<BucketBatchSize>> {
    define_bucket_batch_sizes(
        &statistics.buckets,
        batching.batch_size,
        batching.batch_type,
        &statistics.average_len_target_per_bucket,
        batching.batch_sentences_multiple_of,
    )
}

/// Randomly splits the pairs fitting a bucket into `num_shards` shard files in
/// `output_dir`.
///
/// The corpus is read once. Pairs are spooled to one temporary file per shard and
/// each shard is then built from its spool, so only one shard is held in memory.
pub fn shard_data<I>(
    samples: I,
    loader: &RawParallelDatasetLoader,
    buckets: &[Bucket],
    num_shards: usize,
    seed: u64,
    output_dir: &Path,
) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = Result<ParallelSample>>,
{
    ensure_config!(num_shards > 0, "Number of shards must be positive");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut spools = (0..num_shards)
        .map(|_| -> Result<BufWriter<File>> { Ok(BufWriter::new(tempfile::tempfile_in(output_dir)?)) })
        .collect::<Result<Vec<_>>>()?;
    let mut counts = vec![0usize; num_shards];
    for sample in samples {
        let sample = sample?;
        if get_parallel_bucket(buckets, sample.source_len(), sample.target_len()).is_none() {
            continue;
        }
        let shard = rng.gen_range(0..num_shards);
        serde_json::to_writer(&mut spools[shard], &sample)?;
        spools[shard].write_all(b"\n")?;
        counts[shard] += 1;
    }

    let mut shards = Vec::with_capacity(num_shards);
    for (shard, (spool, count)) in spools.into_iter().zip(counts).enumerate() {
        let mut spool = spool.into_inner().map_err(|e| e.into_error())?;
        spool.seek(SeekFrom::Start(0))?;
        let samples = serde_json::Deserializer::from_reader(BufReader::new(spool))
            .into_iter::<ParallelSample>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let path = output_dir.join(shard_name(shard));
        if count == 0 {
            warn!("No sentence pairs for {}", path.display());
        }
        info!("Writing {} sentence pairs to {}", samples.len(), path.display());
        loader.load(&samples)?.save(&path, false)?;
        shards.push(path);
    }
    Ok(shards)
}

/// Writes shard files, `data.config` and `data.version` to `output_dir`.
#[allow(clippy::too_many_arguments)]
pub fn prepare_data(
    corpus: &CorpusFiles,
    source_vocabs: &[Vocabulary],
    target_vocabs: &[Vocabulary],
    bucketing: &BucketingConfig,
    num_shards: usize,
    seed: u64,
    eop_id: Option<i32>,
    output_dir: &Path,
) -> Result<DataConfig> {
    fs::create_dir_all(output_dir)?;
    let open_corpus = || corpus.open(source_vocabs, target_vocabs);

    let buckets = define_corpus_buckets(open_corpus()?, bucketing)?;
    let data_statistics = accumulate_statistics(open_corpus()?, &buckets, source_vocabs, target_vocabs)?;
    let loader = RawParallelDatasetLoader::new(&buckets, source_vocabs.len(), target_vocabs.len(), eop_id);
    shard_data(open_corpus()?, &loader, &buckets, num_shards, seed, output_dir)?;

    let config = DataConfig {
        data_statistics,
        max_seq_len_source: bucketing.max_seq_len_source,
        max_seq_len_target: bucketing.max_seq_len_target,
        num_source_factors: source_vocabs.len(),
        num_target_factors: target_vocabs.len(),
        eop_id,
    };
    config.save(&output_dir.join(DATA_CONFIG))?;
    fs::write(output_dir.join(DATA_VERSION), PREPARED_DATA_VERSION.to_string())?;
    info!("Prepared data written to {}", output_dir.display());
    Ok(config)
}

/// Reads the whole corpus into memory and returns a filled-up, seeded iterator.
pub fn get_training_data_iter(
    corpus: &CorpusFiles,
    source_vocabs: &[Vocabulary],
    target_vocabs: &[Vocabulary],
    bucketing: &BucketingConfig,
    batching: &BatchingConfig,
    eop_id: Option<i32>,
) -> Result<(ParallelSampleIter, DataConfig)> {
    let samples = corpus
        .open(source_vocabs, target_vocabs)?
        .collect::<Result<Vec<_>>>()?;
    let buckets = define_corpus_buckets(samples.iter().map(Ok), bucketing)?;
    let data_statistics =
        accumulate_statistics(samples.iter().map(Ok), &buckets, source_vocabs, target_vocabs)?;
    let batch_sizes = bucket_batch_sizes(&data_statistics, batching)?;

    let data = RawParallelDatasetLoader::new(&buckets, source_vocabs.len(), target_vocabs.len(), eop_id)
        .load(&samples)?
        .fill_up(&batch_sizes, batching.seed)?;
    drop(samples);
    let iter = ParallelSampleIter::new(data, &buckets, &batch_sizes, batching.permute, batching.seed)?;

    let config = DataConfig {
        data_statistics,
        max_seq_len_source: bucketing.max_seq_len_source,
        max_seq_len_target: bucketing.max_seq_len_target,
        num_source_factors: source_vocabs.len(),
        num_target_factors: target_vocabs.len(),
        eop_id,
    };
    Ok((iter, config))
}

/// Iterator over held-out data, bucketed like the training data. Pairs fitting no
/// training bucket are dropped and samples are never permuted.
pub fn get_validation_data_iter(
    corpus: &CorpusFiles,
    source_vocabs: &[Vocabulary],
    target_vocabs: &[Vocabulary],
    buckets: &[Bucket],
    bucket_batch_sizes: &[BucketBatchSize],
    eop_id: Option<i32>,
    seed: u64,
) -> Result<ParallelSampleIter> {
    let samples = corpus
        .open(source_vocabs, target_vocabs)?
        .collect::<Result<Vec<_>>>()?;
    accumulate_statistics(samples.iter().map(Ok), buckets, source_vocabs, target_vocabs)?;
    let data = RawParallelDatasetLoader::new(buckets, source_vocabs.len(), target_vocabs.len(), eop_id)
        .load(&samples)?
        .fill_up(bucket_batch_sizes, seed)?;
    ParallelSampleIter::new(data, buckets, bucket_batch_sizes, false, seed)
}

/// Shard files of a prepared directory, in index order.
fn list_shards(prepared_dir: &Path) -> Vec<PathBuf> {
    (0..)
        .map(|i| prepared_dir.join(shard_name(i)))
        .take_while(|path| path.is_file())
        .collect()
}

/// Opens a directory written by [`prepare_data`].
pub fn get_prepared_data_iter(
    prepared_dir: &Path,
    batching: &BatchingConfig,
) -> Result<(ShardedParallelSampleIter, DataConfig)> {
    let version_path = prepared_dir.join(DATA_VERSION);
    let version = fs::read_to_string(&version_path)
        .map_err(|e| DataError::serialization(&version_path, e.to_string()))?;
    let version: u32 = version
        .trim()
        .parse()
        .map_err(|_| DataError::serialization(&version_path, format!("invalid version '{version}'")))?;
    if version != PREPARED_DATA_VERSION {
        return Err(DataError::serialization(
            &version_path,
            format!("prepared data version {version}, expected {PREPARED_DATA_VERSION}"),
        ));
    }
    let config = DataConfig::load(&prepared_dir.join(DATA_CONFIG))?;
    let shards = list_shards(prepared_dir);
    ensure_config!(!shards.is_empty(), "No shards found in {}", prepared_dir.display());
    info!("Found {} shards in {}", shards.len(), prepared_dir.display());

    let buckets = config.data_statistics.buckets.clone();
    log_buckets(&buckets);
    let batch_sizes = bucket_batch_sizes(&config.data_statistics, batching)?;
    let iter = ShardedParallelSampleIter::new(
        shards,
        &buckets,
        &batch_sizes,
        batching.permute,
        batching.seed,
    )?;
    Ok((iter, config))
}
