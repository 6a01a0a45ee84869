//! forge.toml configuration
//!
//! A manifest overlays the built-in defaults: output layout, per-format
//! writer settings, the stage list, texture strategies, and LOD options.
//! Everything is validated at parse time; an invalid manifest never reaches
//! the pipeline.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::output::{FormatSettings, OutputConfig, OutputOverrides};
use crate::pipeline::Pipeline;
use crate::stages::StageDescriptor;
use crate::texture::TextureConfig;

/// Pipeline section: the ordered stage list. Empty means the default
/// production pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    #[serde(default)]
    pub stages: Vec<StageDescriptor>,
}

/// LOD section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LodSection {
    #[serde(default)]
    pub enabled: bool,
    /// Explicit level set; omitted means adaptive levels from complexity.
    #[serde(default)]
    pub levels: Option<Vec<f32>>,
}

/// Parsed forge.toml manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeConfig {
    #[serde(default)]
    pub output: OutputOverrides,
    #[serde(default)]
    pub formats: FormatSettings,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub texture: TextureConfig,
    #[serde(default)]
    pub lod: LodSection,
}

impl ForgeConfig {
    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse manifest content; `path` is used for error attribution only.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The validated stage pipeline (the default pipeline when no stages are
    /// configured).
    pub fn pipeline(&self) -> Result<Pipeline, ConfigError> {
        if self.pipeline.stages.is_empty() {
            Ok(Pipeline::standard())
        } else {
            Pipeline::new(self.pipeline.stages.clone())
        }
    }

    /// Output configuration: manifest values overlaid on the defaults.
    pub fn output(&self) -> OutputConfig {
        self.output.merge(OutputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use crate::stages::StageKind;

    fn parse(content: &str) -> Result<ForgeConfig, ConfigError> {
        ForgeConfig::parse(content, Path::new("forge.toml"))
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.output().format, OutputFormat::Preserve);
        assert!(config.output().overwrite);

        let pipeline = config.pipeline().unwrap();
        assert!(!pipeline.is_empty());
    }

    #[test]
    fn test_full_manifest() {
        let config = parse(
            r#"
[output]
format = "both"
naming = "suffix"
directory = "separate"
overwrite = false

[formats]
gltf_pretty = false

[[pipeline.stages]]
stage = "prune"

[[pipeline.stages]]
stage = "simplify"
ratio = 0.5
error = 0.002

[lod]
enabled = true
levels = [1.0, 0.5, 0.25]

[texture.global]
max_size = 1024
min_size = 64
skip_resize_threshold = 64
preserve_optimal_sizes = true
preserve_aspect_ratio = false
"#,
        )
        .unwrap();

        assert_eq!(config.output().format, OutputFormat::Both);
        assert!(!config.output().overwrite);
        assert!(!config.formats.gltf_pretty);

        let pipeline = config.pipeline().unwrap();
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.stages()[0].kind(), StageKind::Prune);

        assert!(config.lod.enabled);
        assert_eq!(config.lod.levels, Some(vec![1.0, 0.5, 0.25]));
        assert_eq!(config.texture.global.max_size, 1024);
    }

    #[test]
    fn test_invalid_output_format_rejected_at_parse() {
        let result = parse(
            r#"
[output]
format = "obj"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result = parse(
            r#"
[surprises]
value = 1
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_stage_params_rejected_by_pipeline() {
        let config = parse(
            r#"
[[pipeline.stages]]
stage = "simplify"
ratio = 2.0
"#,
        )
        .unwrap();
        assert!(config.pipeline().is_err());
    }
}
