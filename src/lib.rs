//! Bucketed, shardable, checkpointable batching of parallel corpora for
//! sequence-to-sequence training.

pub mod alignment;
pub mod batch;
pub mod batcher;
pub mod bucket;
pub mod config;
pub mod constants;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod iterator;
pub mod permutation;
pub mod prepare;
pub mod sharded;
pub mod token;

pub use batch::{Batch, Label};
pub use batcher::{BatchType, BucketBatchSize};
pub use bucket::Bucket;
pub use config::{BatchingConfig, BucketingConfig, DataConfig, DataStatistics};
pub use dataset::ParallelDataSet;
pub use error::{DataError, Result};
pub use iterator::{ParallelSampleIter, SampleIterator};
pub use prepare::{get_prepared_data_iter, get_training_data_iter, prepare_data, CorpusFiles};
pub use sharded::ShardedParallelSampleIter;
pub use token::Vocabulary;
