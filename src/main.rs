use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use seq2seq_data::{
    get_prepared_data_iter, get_training_data_iter, prepare_data, BatchType, BatchingConfig,
    BucketingConfig, CorpusFiles, SampleIterator, Vocabulary,
};
use std::fs::remove_dir_all;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::Device;
use tensorboard_rs as tensorboard;
use tracing::info;

#[derive(Parser)]
#[command(about = "Bucketed batching of parallel corpora")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a corpus into bucketed shard files.
    PrepareData {
        #[command(flatten)]
        corpus: CorpusArgs,
        #[command(flatten)]
        bucketing: BucketingArgs,
        #[arg(long, default_value_t = 1)]
        num_shards: usize,
        #[arg(long, default_value_t = 13)]
        seed: u64,
        #[arg(long)]
        output: PathBuf,
    },
    /// Run the batch iterator over a corpus or a prepared directory.
    Iterate {
        /// Directory written by `prepare-data`; replaces the corpus arguments.
        #[arg(long, conflicts_with = "source")]
        prepared_data: Option<PathBuf>,
        #[command(flatten)]
        corpus: CorpusArgs,
        #[command(flatten)]
        bucketing: BucketingArgs,
        #[command(flatten)]
        batching: BatchingArgs,
        #[arg(long, default_value_t = 1)]
        epochs: u64,
        /// Iterator checkpoint to resume from.
        #[arg(long)]
        load_state: Option<PathBuf>,
        /// Where to write the iterator checkpoint when done.
        #[arg(long)]
        save_state: Option<PathBuf>,
        /// Tensorboard directory for per-batch sample and token counts.
        #[arg(long)]
        logdir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CorpusArgs {
    /// One file per source factor.
    #[arg(long, num_args = 1..)]
    source: Vec<PathBuf>,
    /// One file per target factor.
    #[arg(long, num_args = 1..)]
    target: Vec<PathBuf>,
    #[arg(long)]
    alignment: Option<PathBuf>,
    /// Tokenizer JSON file per source factor.
    #[arg(long, num_args = 1..)]
    source_vocab: Vec<PathBuf>,
    /// Tokenizer JSON file per target factor.
    #[arg(long, num_args = 1..)]
    target_vocab: Vec<PathBuf>,
    /// Id of the tag ending a prefix prepended to source sentences.
    #[arg(long)]
    eop_id: Option<i32>,
}

#[derive(Args)]
struct BucketingArgs {
    /// Maximum number of tokens per sentence, special symbols excluded.
    #[arg(long, default_value_t = 95)]
    max_seq_len: usize,
    #[arg(long, default_value_t = 8)]
    bucket_width: usize,
    #[arg(long)]
    no_bucket_scaling: bool,
}

#[derive(Args)]
struct BatchingArgs {
    #[arg(long, default_value_t = 4096)]
    batch_size: usize,
    /// sentence, word or max-word
    #[arg(long, default_value = "word")]
    batch_type: BatchType,
    #[arg(long, default_value_t = 8)]
    batch_sentences_multiple_of: usize,
    #[arg(long)]
    no_permute: bool,
    #[arg(long, default_value_t = 13)]
    seed: u64,
}

impl CorpusArgs {
    fn files(&self) -> anyhow::Result<CorpusFiles> {
        if self.source.is_empty() || self.target.is_empty() {
            bail!("--source and --target are required");
        }
        Ok(CorpusFiles {
            sources: self.source.clone(),
            targets: self.target.clone(),
            alignment: self.alignment.clone(),
        })
    }

    fn vocabularies(&self) -> anyhow::Result<(Vec<Vocabulary>, Vec<Vocabulary>)> {
        let load = |paths: &[PathBuf]| {
            paths
                .iter()
                .map(|path| {
                    Vocabulary::load(path)
                        .with_context(|| format!("failed to load vocabulary {}", path.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>()
        };
        Ok((load(&self.source_vocab)?, load(&self.target_vocab)?))
    }
}

impl BucketingArgs {
    fn config(&self) -> BucketingConfig {
        BucketingConfig {
            // EOS on the source side, BOS and EOS on the target side
            max_seq_len_source: self.max_seq_len + 1,
            max_seq_len_target: self.max_seq_len + 2,
            bucket_width: self.bucket_width,
            bucket_scaling: !self.no_bucket_scaling,
        }
    }
}

impl BatchingArgs {
    fn config(&self) -> BatchingConfig {
        BatchingConfig {
            batch_size: self.batch_size,
            batch_type: self.batch_type,
            batch_sentences_multiple_of: self.batch_sentences_multiple_of,
            permute: !self.no_permute,
            seed: self.seed,
        }
    }
}

fn iterate(
    iter: &mut dyn SampleIterator,
    epochs: u64,
    logdir: Option<&Path>,
    device: Device,
) -> anyhow::Result<()> {
    let mut writer = match logdir {
        Some(logdir) => {
            remove_dir_all(logdir).ok();
            Some(tensorboard::summary_writer::SummaryWriter::new(logdir))
        }
        None => None,
    };
    let mut steps = 0;
    let now = Instant::now();
    while iter.epoch() <= epochs {
        let (mut samples, mut tokens) = (0, 0);
        while iter.iter_next() {
            let batch = iter.next()?.to_device(device);
            steps += 1;
            samples += batch.samples;
            tokens += batch.tokens;
            if let Some(writer) = writer.as_mut() {
                writer.add_scalar("samples", batch.samples as f32, steps);
                writer.add_scalar("tokens", batch.tokens as f32, steps);
            }
        }
        info!(
            "Epoch {} complete: {} samples, {} tokens, {} batches so far ({:.1}s)",
            iter.epoch(),
            samples,
            tokens,
            steps,
            now.elapsed().as_secs_f32()
        );
        if iter.epoch() == epochs {
            break;
        }
        iter.reset()?;
    }
    if let Some(writer) = writer.as_mut() {
        writer.flush();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::PrepareData {
            corpus,
            bucketing,
            num_shards,
            seed,
            output,
        } => {
            let (source_vocabs, target_vocabs) = corpus.vocabularies()?;
            let config = prepare_data(
                &corpus.files()?,
                &source_vocabs,
                &target_vocabs,
                &bucketing.config(),
                num_shards,
                seed,
                corpus.eop_id,
                &output,
            )
            .with_context(|| format!("failed to prepare data in {}", output.display()))?;
            info!(
                "{} sentence pairs in {} buckets",
                config.data_statistics.num_sents,
                config.data_statistics.buckets.len()
            );
        }
        Command::Iterate {
            prepared_data,
            corpus,
            bucketing,
            batching,
            epochs,
            load_state,
            save_state,
            logdir,
        } => {
            if epochs == 0 {
                bail!("--epochs must be at least 1");
            }
            let device = Device::cuda_if_available();
            let mut iter: Box<dyn SampleIterator> = match prepared_data {
                Some(dir) => Box::new(
                    get_prepared_data_iter(&dir, &batching.config())
                        .with_context(|| format!("failed to open prepared data {}", dir.display()))?
                        .0,
                ),
                None => {
                    let (source_vocabs, target_vocabs) = corpus.vocabularies()?;
                    let (iter, _) = get_training_data_iter(
                        &corpus.files()?,
                        &source_vocabs,
                        &target_vocabs,
                        &bucketing.config(),
                        &batching.config(),
                        corpus.eop_id,
                    )?;
                    Box::new(iter)
                }
            };
            if let Some(path) = &load_state {
                iter.load_state(path)
                    .with_context(|| format!("failed to load iterator state {}", path.display()))?;
                info!("Resuming at epoch {}", iter.epoch());
            }
            iterate(iter.as_mut(), epochs, logdir.as_deref(), device)?;
            if let Some(path) = &save_state {
                iter.save_state(path)
                    .with_context(|| format!("failed to save iterator state {}", path.display()))?;
            }
        }
    }
    Ok(())
}
