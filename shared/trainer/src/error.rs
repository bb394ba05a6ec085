use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("invalid controller configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Data(#[from] weft_data_provider::DataError),

    #[error("training runtime failed: {0:#}")]
    Runtime(anyhow::Error),

    #[error("io error at {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("no checkpoint found in {0:?} to resume from")]
    NothingToResume(PathBuf),

    #[error("stream exhausted after {skipped} of {target} fast-forward iterations")]
    FastForwardExhausted { skipped: u64, target: u64 },
}
