//! Transform engine
//!
//! One capability per stage kind, dispatched from a single match. The
//! orchestrator only sees the `TransformEngine` trait; tests substitute
//! recording or failing engines through the same seam.

pub mod geometry;
pub mod raster;
pub mod scene;

use scene_doc::SceneDocument;

use crate::error::StageError;
use crate::stages::StageDescriptor;
use crate::texture::TextureConfig;

/// A provider of transform capabilities, one per stage kind.
pub trait TransformEngine: Sync {
    fn apply(&self, doc: &mut SceneDocument, stage: &StageDescriptor) -> Result<(), StageError>;
}

/// The production engine: geometry capabilities backed by meshopt and
/// MikkTSpace, texture re-encoding backed by the image crate.
#[derive(Debug, Clone, Default)]
pub struct StandardEngine {
    texture_config: TextureConfig,
}

impl StandardEngine {
    pub fn new(texture_config: TextureConfig) -> Self {
        Self { texture_config }
    }
}

impl TransformEngine for StandardEngine {
    fn apply(&self, doc: &mut SceneDocument, stage: &StageDescriptor) -> Result<(), StageError> {
        match *stage {
            StageDescriptor::Palette { min } => scene::palette(doc, min),
            StageDescriptor::ColorSpace { input } => scene::color_space(doc, input),
            StageDescriptor::Resample { tolerance } => scene::resample(doc, tolerance),
            StageDescriptor::Prune => scene::prune(doc),
            StageDescriptor::Dedup {
                meshes,
                materials,
                textures,
            } => scene::dedup(doc, meshes, materials, textures),
            StageDescriptor::Weld {
                tolerance,
                tolerance_normal,
            } => geometry::weld(doc, tolerance, tolerance_normal),
            StageDescriptor::Simplify {
                ratio,
                error,
                min_points,
                lock_border,
            } => geometry::simplify(doc, ratio, error, min_points, lock_border),
            StageDescriptor::Instance { min } => scene::instance(doc, min),
            StageDescriptor::Flatten => scene::flatten(doc),
            StageDescriptor::Join { keep_named } => scene::join(doc, keep_named),
            StageDescriptor::Normals { overwrite } => geometry::recompute_normals(doc, overwrite),
            StageDescriptor::Reorder { level } => geometry::reorder(doc, level),
            StageDescriptor::Compress { level } => geometry::quantize(doc, level),
            StageDescriptor::Sparsify { epsilon } => geometry::sparsify(doc, epsilon),
            StageDescriptor::Tangents => geometry::generate_tangents(doc),
            StageDescriptor::Dequantize => geometry::dequantize(doc),
            StageDescriptor::TextureCompress {
                target_format,
                quality,
            } => raster::compress_textures(doc, target_format, quality, &self.texture_config),
        }
    }
}
