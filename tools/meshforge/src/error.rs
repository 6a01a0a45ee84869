//! Pipeline error taxonomy
//!
//! `ConfigError` is fatal before any work begins. `StageError` and the
//! document engine's `DocError` abort one file and are recovered at the batch
//! boundary; partial multi-format write failures are collected per format by
//! the output resolver without rolling back formats that succeeded.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration, rejected before any processing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameters for stage '{stage}': {reason}")]
    StageParams { stage: &'static str, reason: String },

    #[error("invalid LOD levels: {0}")]
    LodLevels(String),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A transform capability rejected its input or parameters.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Pipeline execution failure, attributed to the failing stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed ({params}): {source}")]
    Stage {
        stage: &'static str,
        params: String,
        #[source]
        source: StageError,
    },

    #[error("pipeline cancelled after {completed} of {total} stages")]
    Cancelled { completed: usize, total: usize },
}
