//! Adaptive LOD generation
//!
//! Derives a simplification level set from measured document complexity and
//! produces one independent document clone per level, plus a JSON sidecar
//! index mapping levels to files and viewing-distance thresholds.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scene_doc::{ComplexityMetrics, SceneDocument, WriteOptions};

use crate::engine::TransformEngine;
use crate::error::{ConfigError, StageError};
use crate::stages::StageDescriptor;

/// Base simplification error budget; grows as detail shrinks.
pub const BASE_SIMPLIFY_ERROR: f32 = 0.001;

/// Primitives at or below this point count are never simplified.
pub const SIMPLIFY_MIN_POINTS: usize = 100;

/// One generated level: an independent document clone tagged with its ratio.
#[derive(Debug)]
pub struct LodVariant {
    pub level: f32,
    pub document: SceneDocument,
}

/// Sidecar index entry. Paths are relative to the sidecar's own directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LodIndexEntry {
    pub level: f32,
    pub path: String,
    pub distance_threshold: u32,
}

/// Persisted LOD index consumed by runtime renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LodIndex {
    pub model: String,
    pub levels: Vec<LodIndexEntry>,
}

/// LOD generation failure.
#[derive(Debug, Error)]
pub enum LodError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("simplification failed at level {level}: {source}")]
    Simplify {
        level: f32,
        #[source]
        source: StageError,
    },
}

/// Derive the level set from complexity. Tiers are checked most complex
/// first; either metric exceeding its bound selects the tier.
pub fn optimal_levels(metrics: &ComplexityMetrics) -> Vec<f32> {
    let ComplexityMetrics {
        vertex_count,
        triangle_count,
    } = *metrics;

    if triangle_count > 50_000 || vertex_count > 100_000 {
        vec![1.0, 0.7, 0.4, 0.2, 0.1]
    } else if triangle_count > 20_000 || vertex_count > 50_000 {
        vec![1.0, 0.7, 0.4, 0.15]
    } else if triangle_count > 5_000 || vertex_count > 10_000 {
        vec![1.0, 0.6, 0.2]
    } else if triangle_count > 500 || vertex_count > 1_000 {
        vec![1.0, 0.3]
    } else {
        vec![1.0]
    }
}

/// Suggested viewing distance for a level. A placeholder heuristic; callers
/// may override in the sidecar.
pub fn distance_threshold(level: f32) -> u32 {
    (100.0 / level).round() as u32
}

fn validate_levels(levels: &[f32]) -> Result<(), ConfigError> {
    let mut previous: Option<f32> = None;
    for (index, &level) in levels.iter().enumerate() {
        if !(level > 0.0 && level <= 1.0) {
            return Err(ConfigError::LodLevels(format!(
                "level {} out of range (0, 1]",
                level
            )));
        }
        if index == 0 && level == 1.0 {
            previous = Some(level);
            continue;
        }
        if let Some(prev) = previous {
            if level >= prev {
                return Err(ConfigError::LodLevels(format!(
                    "levels must be strictly decreasing, got {} after {}",
                    level, prev
                )));
            }
        }
        previous = Some(level);
    }
    Ok(())
}

/// Generate the LOD variant set for a post-pipeline document.
///
/// Index 0 is always the unmodified clone at level 1.0. Every other level
/// clones the input document (never the previous level), so simplification
/// error does not compound across levels.
pub fn generate_lods(
    doc: &SceneDocument,
    levels: Option<&[f32]>,
    engine: &dyn TransformEngine,
) -> Result<Vec<LodVariant>, LodError> {
    let computed;
    let levels: &[f32] = match levels {
        Some(explicit) => {
            validate_levels(explicit)?;
            explicit
        }
        None => {
            let metrics = doc.complexity();
            computed = optimal_levels(&metrics);
            tracing::info!(
                "auto LOD levels {:?} ({} vertices, {} triangles)",
                computed,
                metrics.vertex_count,
                metrics.triangle_count
            );
            &computed
        }
    };

    let mut variants = vec![LodVariant {
        level: 1.0,
        document: doc.clone(),
    }];

    for &level in levels {
        if level >= 1.0 {
            // The base level is the unmodified clone already in place.
            continue;
        }
        tracing::info!("generating LOD level {}", level);

        let mut document = doc.clone();
        let stage = StageDescriptor::Simplify {
            ratio: level,
            error: BASE_SIMPLIFY_ERROR * (1.0 / level),
            min_points: SIMPLIFY_MIN_POINTS,
            lock_border: false,
        };
        engine
            .apply(&mut document, &stage)
            .map_err(|source| LodError::Simplify { level, source })?;

        variants.push(LodVariant { level, document });
    }

    Ok(variants)
}

/// File-name tag for a level: `0.7` -> `0_7`, `1` -> `1`.
fn level_tag(level: f32) -> String {
    format!("{}", level).replace('.', "_")
}

/// Write every variant as GLB next to the primary output and drop the JSON
/// sidecar index beside them.
pub fn write_lod_set(
    variants: &[LodVariant],
    primary_output: &Path,
) -> anyhow::Result<(LodIndex, PathBuf)> {
    let dir = primary_output.parent().unwrap_or_else(|| Path::new("."));
    let stem = primary_output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());

    let mut index = LodIndex {
        model: stem.clone(),
        levels: Vec::new(),
    };

    for variant in variants {
        let file_name = format!("{}_lod_{}.glb", stem, level_tag(variant.level));
        let path = dir.join(&file_name);
        scene_doc::write_document(&path, &variant.document, &WriteOptions::default())
            .with_context(|| format!("failed to write LOD {} to {}", variant.level, path.display()))?;
        tracing::info!("LOD {} saved: {}", variant.level, path.display());

        index.levels.push(LodIndexEntry {
            level: variant.level,
            path: file_name,
            distance_threshold: distance_threshold(variant.level),
        });
    }

    let sidecar = dir.join(format!("{}_lod_config.json", stem));
    let json = serde_json::to_string_pretty(&index)?;
    std::fs::write(&sidecar, json)
        .with_context(|| format!("failed to write LOD index {}", sidecar.display()))?;
    tracing::info!("LOD index saved: {}", sidecar.display());

    Ok((index, sidecar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StandardEngine;
    use scene_doc::{Mesh, Primitive};

    fn doc_with_vertices(count: usize) -> SceneDocument {
        let mut doc = SceneDocument::default();
        doc.meshes.push(Mesh {
            name: None,
            primitives: vec![Primitive {
                positions: vec![[0.0, 0.0, 0.0]; count],
                indices: Vec::new(),
                ..Default::default()
            }],
        });
        doc
    }

    #[test]
    fn test_level_table_tiers() {
        let tier = |v: u64, t: u64| {
            optimal_levels(&ComplexityMetrics {
                vertex_count: v,
                triangle_count: t,
            })
        };

        assert_eq!(tier(120_000, 0), vec![1.0, 0.7, 0.4, 0.2, 0.1]);
        assert_eq!(tier(0, 60_000), vec![1.0, 0.7, 0.4, 0.2, 0.1]);
        assert_eq!(tier(60_000, 0), vec![1.0, 0.7, 0.4, 0.15]);
        assert_eq!(tier(0, 30_000), vec![1.0, 0.7, 0.4, 0.15]);
        assert_eq!(tier(20_000, 0), vec![1.0, 0.6, 0.2]);
        assert_eq!(tier(0, 6_000), vec![1.0, 0.6, 0.2]);
        assert_eq!(tier(2_000, 0), vec![1.0, 0.3]);
        assert_eq!(tier(0, 600), vec![1.0, 0.3]);
        assert_eq!(tier(500, 100), vec![1.0]);
    }

    #[test]
    fn test_thresholds_are_strict() {
        // Exactly at a bound selects the simpler tier.
        let metrics = ComplexityMetrics {
            vertex_count: 100_000,
            triangle_count: 50_000,
        };
        assert_eq!(optimal_levels(&metrics), vec![1.0, 0.7, 0.4, 0.15]);
    }

    #[test]
    fn test_distance_thresholds() {
        assert_eq!(distance_threshold(1.0), 100);
        assert_eq!(distance_threshold(0.7), 143);
        assert_eq!(distance_threshold(0.4), 250);
        assert_eq!(distance_threshold(0.2), 500);
        assert_eq!(distance_threshold(0.1), 1000);
    }

    #[test]
    fn test_complex_document_yields_five_variants() {
        let doc = doc_with_vertices(120_000);
        let engine = StandardEngine::default();

        let variants = generate_lods(&doc, None, &engine).unwrap();

        let levels: Vec<f32> = variants.iter().map(|v| v.level).collect();
        assert_eq!(levels, vec![1.0, 0.7, 0.4, 0.2, 0.1]);

        let thresholds: Vec<u32> = levels.iter().map(|&l| distance_threshold(l)).collect();
        assert_eq!(thresholds, vec![100, 143, 250, 500, 1000]);
    }

    #[test]
    fn test_base_level_is_unmodified_clone() {
        let mut doc = doc_with_vertices(200);
        doc.meshes[0].primitives[0].positions[0] = [1.5, 2.5, 3.5];
        let engine = StandardEngine::default();

        let variants = generate_lods(&doc, None, &engine).unwrap();

        assert_eq!(variants[0].level, 1.0);
        assert_eq!(
            variants[0].document.meshes[0].primitives[0].positions,
            doc.meshes[0].primitives[0].positions
        );
        assert_eq!(
            variants[0].document.complexity(),
            doc.complexity()
        );
    }

    #[test]
    fn test_ratios_decrease_after_base() {
        let doc = doc_with_vertices(120_000);
        let engine = StandardEngine::default();
        let variants = generate_lods(&doc, None, &engine).unwrap();

        for pair in variants[1..].windows(2) {
            assert!(pair[1].level < pair[0].level);
        }
    }

    #[test]
    fn test_explicit_levels_validated() {
        let doc = doc_with_vertices(10);
        let engine = StandardEngine::default();

        assert!(generate_lods(&doc, Some(&[1.0, 0.5, 0.7]), &engine).is_err());
        assert!(generate_lods(&doc, Some(&[0.5, 0.0]), &engine).is_err());
        assert!(generate_lods(&doc, Some(&[1.0, 0.5, 0.25]), &engine).is_ok());

        // Leading 1.0 is not duplicated.
        let variants = generate_lods(&doc, Some(&[1.0, 0.5]), &engine).unwrap();
        let levels: Vec<f32> = variants.iter().map(|v| v.level).collect();
        assert_eq!(levels, vec![1.0, 0.5]);
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(level_tag(1.0), "1");
        assert_eq!(level_tag(0.7), "0_7");
        assert_eq!(level_tag(0.15), "0_15");
    }

    #[test]
    fn test_write_lod_set_sidecar_fields() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("rock.glb");
        let doc = doc_with_vertices(3);
        let variants = vec![LodVariant {
            level: 1.0,
            document: doc,
        }];

        let (index, sidecar) = write_lod_set(&variants, &primary).unwrap();

        assert_eq!(index.model, "rock");
        assert!(dir.path().join("rock_lod_1.glb").exists());
        assert!(sidecar.exists());

        // Consumers rely on these exact field names.
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&sidecar).unwrap()).unwrap();
        let entry = &raw["levels"][0];
        assert_eq!(entry["level"], 1.0);
        assert_eq!(entry["path"], "rock_lod_1.glb");
        assert_eq!(entry["distanceThreshold"], 100);
    }
}
