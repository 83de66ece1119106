use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DataError> = std::result::Result<T, E>;

/// Every failure the data pipeline can report.
///
/// Only [`DataError::Exhausted`] is expected during normal operation: it marks the
/// end of an epoch and the caller recovers by calling `reset()`.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("alignment mismatch: {0}")]
    AlignmentMismatch(String),

    #[error("malformed input: {0}")]
    Parse(String),

    #[error("{0}")]
    NotParallel(String),

    #[error("no batches left in this epoch, call reset() first")]
    Exhausted,

    #[error("could not read {path}: {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tensor(#[from] tch::TchError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DataError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        DataError::Config(msg.into())
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DataError::Serialization {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Bails out with a [`DataError::Config`] when `cond` does not hold.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::DataError::Config(format!($($arg)+)));
        }
    };
}
pub(crate) use ensure_config;
