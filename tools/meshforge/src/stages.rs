//! Pipeline stage descriptors
//!
//! The stage set is a closed enum: an unrecognized stage name in a manifest
//! fails at parse time, before any stage runs. Each variant carries its own
//! parameter record; stage order in a manifest is execution order and is
//! never rearranged.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identity of a stage, used for dispatch and error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Palette,
    ColorSpace,
    Resample,
    Prune,
    Dedup,
    Weld,
    Simplify,
    Instance,
    Flatten,
    Join,
    Normals,
    Reorder,
    Compress,
    Sparsify,
    Tangents,
    Dequantize,
    TextureCompress,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Palette => "palette",
            StageKind::ColorSpace => "color-space",
            StageKind::Resample => "resample",
            StageKind::Prune => "prune",
            StageKind::Dedup => "dedup",
            StageKind::Weld => "weld",
            StageKind::Simplify => "simplify",
            StageKind::Instance => "instance",
            StageKind::Flatten => "flatten",
            StageKind::Join => "join",
            StageKind::Normals => "normals",
            StageKind::Reorder => "reorder",
            StageKind::Compress => "compress",
            StageKind::Sparsify => "sparsify",
            StageKind::Tangents => "tangents",
            StageKind::Dequantize => "dequantize",
            StageKind::TextureCompress => "texture-compress",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Input color space for vertex color correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Srgb,
    Linear,
}

/// Vertex-cache reorder effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderLevel {
    Low,
    Medium,
    High,
}

/// Target encoding for re-encoded textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureTarget {
    Png,
    Jpeg,
}

fn default_palette_min() -> usize {
    5
}
fn default_color_space() -> ColorSpace {
    ColorSpace::Srgb
}
fn default_resample_tolerance() -> f32 {
    1e-4
}
fn default_true() -> bool {
    true
}
fn default_weld_tolerance() -> f32 {
    1e-4
}
fn default_weld_tolerance_normal() -> f32 {
    0.25
}
fn default_simplify_ratio() -> f32 {
    0.75
}
fn default_simplify_error() -> f32 {
    0.001
}
fn default_min_points() -> usize {
    100
}
fn default_instance_min() -> usize {
    2
}
fn default_reorder_level() -> ReorderLevel {
    ReorderLevel::High
}
fn default_compress_level() -> u8 {
    7
}
fn default_sparsify_epsilon() -> f32 {
    1e-3
}
fn default_texture_target() -> TextureTarget {
    TextureTarget::Png
}
fn default_texture_quality() -> u8 {
    85
}

/// One configured pipeline stage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StageDescriptor {
    /// Merge materials identical after base-color quantization.
    Palette {
        #[serde(default = "default_palette_min")]
        min: usize,
    },
    /// Convert COLOR_0 vertex colors from the input space to linear.
    ColorSpace {
        #[serde(default = "default_color_space")]
        input: ColorSpace,
    },
    /// Lossless removal of linear-interpolable animation keyframes.
    Resample {
        #[serde(default = "default_resample_tolerance")]
        tolerance: f32,
    },
    /// Drop unreachable nodes and unreferenced meshes/materials/textures.
    Prune,
    /// Content-hash deduplication per enabled scope.
    Dedup {
        #[serde(default = "default_true")]
        meshes: bool,
        #[serde(default = "default_true")]
        materials: bool,
        #[serde(default = "default_true")]
        textures: bool,
    },
    /// Merge coincident vertices within tolerance.
    Weld {
        #[serde(default = "default_weld_tolerance")]
        tolerance: f32,
        #[serde(default = "default_weld_tolerance_normal")]
        tolerance_normal: f32,
    },
    /// Meshopt-backed index simplification.
    Simplify {
        #[serde(default = "default_simplify_ratio")]
        ratio: f32,
        #[serde(default = "default_simplify_error")]
        error: f32,
        #[serde(default = "default_min_points")]
        min_points: usize,
        #[serde(default)]
        lock_border: bool,
    },
    /// Collapse duplicate mesh copies into shared references.
    Instance {
        #[serde(default = "default_instance_min")]
        min: usize,
    },
    /// Bake static node transforms into vertex data.
    Flatten,
    /// Concatenate primitives sharing a material.
    Join {
        #[serde(default)]
        keep_named: bool,
    },
    /// Recompute area-weighted vertex normals.
    Normals {
        #[serde(default = "default_true")]
        overwrite: bool,
    },
    /// Vertex cache/fetch reordering.
    Reorder {
        #[serde(default = "default_reorder_level")]
        level: ReorderLevel,
    },
    /// Lossy attribute precision quantization.
    Compress {
        #[serde(default = "default_compress_level")]
        level: u8,
    },
    /// Zero sub-epsilon skin weights and renormalize.
    Sparsify {
        #[serde(default = "default_sparsify_epsilon")]
        epsilon: f32,
    },
    /// MikkTSpace tangent generation.
    Tangents,
    /// Clear quantization markers, restoring full-precision storage.
    Dequantize,
    /// Re-encode textures through the strategy resolver.
    TextureCompress {
        #[serde(default = "default_texture_target")]
        target_format: TextureTarget,
        #[serde(default = "default_texture_quality")]
        quality: u8,
    },
}

impl StageDescriptor {
    pub fn kind(&self) -> StageKind {
        match self {
            StageDescriptor::Palette { .. } => StageKind::Palette,
            StageDescriptor::ColorSpace { .. } => StageKind::ColorSpace,
            StageDescriptor::Resample { .. } => StageKind::Resample,
            StageDescriptor::Prune => StageKind::Prune,
            StageDescriptor::Dedup { .. } => StageKind::Dedup,
            StageDescriptor::Weld { .. } => StageKind::Weld,
            StageDescriptor::Simplify { .. } => StageKind::Simplify,
            StageDescriptor::Instance { .. } => StageKind::Instance,
            StageDescriptor::Flatten => StageKind::Flatten,
            StageDescriptor::Join { .. } => StageKind::Join,
            StageDescriptor::Normals { .. } => StageKind::Normals,
            StageDescriptor::Reorder { .. } => StageKind::Reorder,
            StageDescriptor::Compress { .. } => StageKind::Compress,
            StageDescriptor::Sparsify { .. } => StageKind::Sparsify,
            StageDescriptor::Tangents => StageKind::Tangents,
            StageDescriptor::Dequantize => StageKind::Dequantize,
            StageDescriptor::TextureCompress { .. } => StageKind::TextureCompress,
        }
    }

    /// Compact parameter summary for error attribution and logging.
    pub fn params_summary(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.kind().name().to_string())
    }

    /// Validate parameters. Called for the whole pipeline before any stage
    /// runs, so bad configuration never fails mid-pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |reason: String| ConfigError::StageParams {
            stage: self.kind().name(),
            reason,
        };

        match *self {
            StageDescriptor::Palette { min } if min == 0 => {
                Err(err("min must be at least 1".into()))
            }
            StageDescriptor::Resample { tolerance } if tolerance < 0.0 => {
                Err(err(format!("tolerance {} must be non-negative", tolerance)))
            }
            StageDescriptor::Weld { tolerance, .. } if tolerance < 0.0 => {
                Err(err(format!("tolerance {} must be non-negative", tolerance)))
            }
            StageDescriptor::Simplify { ratio, .. } if !(ratio > 0.0 && ratio <= 1.0) => {
                Err(err(format!("ratio {} must be in (0, 1]", ratio)))
            }
            StageDescriptor::Simplify { error, .. } if error <= 0.0 => {
                Err(err(format!("error {} must be positive", error)))
            }
            StageDescriptor::Instance { min } if min < 2 => {
                Err(err("min must be at least 2".into()))
            }
            StageDescriptor::Compress { level } if level > 10 => {
                Err(err(format!("level {} must be 0-10", level)))
            }
            StageDescriptor::Sparsify { epsilon } if !(0.0..1.0).contains(&epsilon) => {
                Err(err(format!("epsilon {} must be in [0, 1)", epsilon)))
            }
            StageDescriptor::TextureCompress { quality, .. }
                if quality == 0 || quality > 100 =>
            {
                Err(err(format!("quality {} must be 1-100", quality)))
            }
            _ => Ok(()),
        }
    }
}

/// The default production pipeline. Canonical ordering: color work before
/// resampling, resample/prune/dedup before geometry stages, simplify before
/// reorder, a tightening weld ladder after reorder, tangents last on the
/// final normals/UVs. Callers may configure any other order; it is applied
/// as given.
pub fn default_pipeline() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::Palette { min: 5 },
        StageDescriptor::ColorSpace {
            input: ColorSpace::Srgb,
        },
        StageDescriptor::Resample { tolerance: 1e-4 },
        StageDescriptor::Prune,
        StageDescriptor::Dedup {
            meshes: true,
            materials: true,
            textures: true,
        },
        StageDescriptor::Instance { min: 2 },
        StageDescriptor::Compress { level: 7 },
        StageDescriptor::TextureCompress {
            target_format: TextureTarget::Png,
            quality: 85,
        },
        StageDescriptor::Simplify {
            ratio: 0.75,
            error: 0.001,
            min_points: 100,
            lock_border: false,
        },
        StageDescriptor::Reorder {
            level: ReorderLevel::High,
        },
        StageDescriptor::Weld {
            tolerance: 0.001,
            tolerance_normal: 0.25,
        },
        StageDescriptor::Weld {
            tolerance: 1e-5,
            tolerance_normal: 0.1,
        },
        StageDescriptor::Weld {
            tolerance: 1e-6,
            tolerance_normal: 0.1,
        },
        StageDescriptor::Tangents,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            stages: Vec<StageDescriptor>,
        }

        let wrapper: Wrapper = toml::from_str(
            r#"
[[stages]]
stage = "simplify"
ratio = 0.5

[[stages]]
stage = "weld"

[[stages]]
stage = "prune"
"#,
        )
        .unwrap();

        assert_eq!(wrapper.stages.len(), 3);
        assert_eq!(
            wrapper.stages[0],
            StageDescriptor::Simplify {
                ratio: 0.5,
                error: 0.001,
                min_points: 100,
                lock_border: false,
            }
        );
        assert_eq!(wrapper.stages[1].kind(), StageKind::Weld);
        assert_eq!(wrapper.stages[2], StageDescriptor::Prune);
    }

    #[test]
    fn test_unknown_stage_fails_closed() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[allow(dead_code)]
            stages: Vec<StageDescriptor>,
        }

        let result: Result<Wrapper, _> = toml::from_str(
            r#"
[[stages]]
stage = "explode"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let stage = StageDescriptor::Simplify {
            ratio: 0.0,
            error: 0.001,
            min_points: 100,
            lock_border: false,
        };
        assert!(stage.validate().is_err());

        let stage = StageDescriptor::Simplify {
            ratio: 1.5,
            error: 0.001,
            min_points: 100,
            lock_border: false,
        };
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        for stage in default_pipeline() {
            assert!(stage.validate().is_ok(), "default stage invalid: {:?}", stage);
        }
    }

    #[test]
    fn test_default_pipeline_has_weld_ladder() {
        let stages = default_pipeline();
        let welds: Vec<f32> = stages
            .iter()
            .filter_map(|s| match s {
                StageDescriptor::Weld { tolerance, .. } => Some(*tolerance),
                _ => None,
            })
            .collect();
        assert_eq!(welds.len(), 3);
        // Tightening ladder
        assert!(welds[0] > welds[1] && welds[1] > welds[2]);
    }
}
