//! Reserved ids, symbols, label names and file names shared across the pipeline.

pub const PAD_ID: i32 = 0;
pub const UNK_ID: i32 = 1;
pub const BOS_ID: i32 = 2;
pub const EOS_ID: i32 = 3;

pub const PAD_SYMBOL: &str = "<pad>";
pub const UNK_SYMBOL: &str = "<unk>";
pub const BOS_SYMBOL: &str = "<s>";
pub const EOS_SYMBOL: &str = "</s>";

/// Target side gets BOS, both sides get EOS.
pub const SPACE_FOR_XOS: usize = 1;

pub const TARGET_LABEL_NAME: &str = "target_label";
pub const TARGET_FACTOR_LABEL_NAME: &str = "target_factor";
pub const LENRATIO_LABEL_NAME: &str = "length_ratio_label";
pub const ALIGNMENT_MATRIX_LABEL_NAME: &str = "alignment_matrix_label";

pub const SHARD_NAME: &str = "shard";
pub const DATA_CONFIG: &str = "data.config";
pub const DATA_VERSION: &str = "data.version";
pub const SHARD_ITER_SUFFIX: &str = ".sharditer";

/// Version written to `data.version` in a prepared-data directory.
pub const PREPARED_DATA_VERSION: u32 = 1;

/// `format.version` entry of shard files.
pub const SHARD_FORMAT_LEGACY: i64 = 1;
pub const SHARD_FORMAT_CURRENT: i64 = 2;

/// `version` field of iterator checkpoint files.
pub const ITER_STATE_VERSION: u32 = 1;

pub fn shard_name(index: usize) -> String {
    format!("{SHARD_NAME}.{index:05}")
}
