//! meshforge library
//!
//! Batch glTF asset optimization: a configurable transform pipeline, adaptive
//! LOD generation, configuration-driven output layout, and a batch controller
//! with per-file failure isolation.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod lod;
pub mod output;
pub mod pipeline;
pub mod stages;
pub mod texture;

pub use batch::{run_batch, BatchOptions, RunStats};
pub use config::ForgeConfig;
pub use engine::{StandardEngine, TransformEngine};
pub use error::{ConfigError, PipelineError, StageError};
pub use lod::{generate_lods, optimal_levels, LodIndex, LodVariant};
pub use output::{resolve_outputs, DirectoryLayout, NamingScheme, OutputConfig, OutputFormat};
pub use pipeline::Pipeline;
pub use stages::{StageDescriptor, StageKind};
pub use texture::TextureConfig;
