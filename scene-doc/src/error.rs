//! Document engine error type

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by document import/export.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image encode/decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("document JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported document feature: {0}")]
    Unsupported(String),
}

impl DocError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
