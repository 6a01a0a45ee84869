//! Scene document model
//!
//! One `SceneDocument` holds everything the pipeline mutates for a single
//! asset. Cross-references between collections are plain indices; helpers that
//! remove elements are responsible for remapping them.

use glam::{Mat4, Quat, Vec3};
use image::RgbaImage;

/// Measured mesh complexity, queried once per document by the LOD generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComplexityMetrics {
    pub vertex_count: u64,
    pub triangle_count: u64,
}

/// A complete in-memory scene document.
#[derive(Debug, Clone, Default)]
pub struct SceneDocument {
    pub scenes: Vec<Scene>,
    pub default_scene: Option<usize>,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub animations: Vec<Animation>,
}

/// A scene: a named set of root nodes.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub name: Option<String>,
    pub roots: Vec<usize>,
}

/// A scene-graph node with a TRS transform and an optional mesh reference.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub translation: [f32; 3],
    /// Unit quaternion, xyzw.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            name: None,
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            mesh: None,
            children: Vec::new(),
        }
    }
}

impl Node {
    /// Local transform as a column-major matrix.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::from(self.scale),
            Quat::from_array(self.rotation),
            Vec3::from(self.translation),
        )
    }

    /// True when the node's TRS is the identity transform.
    pub fn is_identity(&self) -> bool {
        self.translation == [0.0; 3]
            && self.rotation == [0.0, 0.0, 0.0, 1.0]
            && self.scale == [1.0; 3]
    }
}

/// A mesh: one or more triangle primitives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
}

/// Marker left by the compress stage: attribute precision has been reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantization {
    pub level: u8,
}

/// One triangle primitive. Indices are always present; importers synthesize
/// a sequential index buffer for non-indexed geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Primitive {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub tangents: Option<Vec<[f32; 4]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub joints: Option<Vec<[u16; 4]>>,
    pub weights: Option<Vec<[f32; 4]>>,
    pub indices: Vec<u32>,
    pub material: Option<usize>,
    pub quantization: Option<Quantization>,
}

impl Primitive {
    /// Number of vertices (the "point count" used by simplification filters).
    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Material alpha rendering mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaMode {
    Opaque,
    Mask { cutoff: f32 },
    Blend,
}

/// A PBR metallic-roughness material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<usize>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub occlusion_texture: Option<usize>,
    pub emissive_factor: [f32; 3],
    pub emissive_texture: Option<usize>,
    pub alpha_mode: AlphaMode,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            base_color_factor: [1.0; 4],
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_factor: [0.0; 3],
            emissive_texture: None,
            alpha_mode: AlphaMode::Opaque,
            double_sided: false,
        }
    }
}

impl Material {
    /// All texture indices referenced by this material.
    pub fn texture_refs(&self) -> impl Iterator<Item = usize> + '_ {
        [
            self.base_color_texture,
            self.metallic_roughness_texture,
            self.normal_texture,
            self.occlusion_texture,
            self.emissive_texture,
        ]
        .into_iter()
        .flatten()
    }

    /// Remap every texture reference through `f` (None drops the reference).
    pub fn remap_textures(&mut self, f: impl Fn(usize) -> Option<usize>) {
        for slot in [
            &mut self.base_color_texture,
            &mut self.metallic_roughness_texture,
            &mut self.normal_texture,
            &mut self.occlusion_texture,
            &mut self.emissive_texture,
        ] {
            *slot = slot.and_then(&f);
        }
    }
}

/// Encoding a texture will be written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Jpeg { quality: u8 },
}

/// A texture: decoded pixels plus the encoding used on export.
#[derive(Debug, Clone)]
pub struct Texture {
    pub name: String,
    pub image: RgbaImage,
    pub encoding: ImageEncoding,
}

impl Texture {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Animated node property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPath {
    Translation,
    Rotation,
    Scale,
    Weights,
}

/// Keyframe interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    CubicSpline,
}

/// Keyframe values, one entry per time sample.
#[derive(Debug, Clone)]
pub enum ChannelValues {
    Vec3(Vec<[f32; 3]>),
    Quat(Vec<[f32; 4]>),
    Scalar(Vec<f32>),
}

impl ChannelValues {
    pub fn len(&self) -> usize {
        match self {
            ChannelValues::Vec3(v) => v.len(),
            ChannelValues::Quat(v) => v.len(),
            ChannelValues::Scalar(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One animation channel targeting a node property.
#[derive(Debug, Clone)]
pub struct Channel {
    pub target_node: usize,
    pub path: ChannelPath,
    pub interpolation: Interpolation,
    pub times: Vec<f32>,
    pub values: ChannelValues,
}

/// A named animation clip.
#[derive(Debug, Clone, Default)]
pub struct Animation {
    pub name: Option<String>,
    pub channels: Vec<Channel>,
}

impl SceneDocument {
    /// Measure document complexity across all mesh primitives.
    pub fn complexity(&self) -> ComplexityMetrics {
        let mut metrics = ComplexityMetrics::default();
        for mesh in &self.meshes {
            for prim in &mesh.primitives {
                metrics.vertex_count += prim.point_count() as u64;
                metrics.triangle_count += prim.triangle_count() as u64;
            }
        }
        metrics
    }

    /// Set `double_sided` on every material (backface-culling post-step).
    pub fn set_all_double_sided(&mut self, double_sided: bool) {
        for material in &mut self.materials {
            material.double_sided = double_sided;
        }
    }

    /// Root node indices of the default scene (or the first scene).
    pub fn scene_roots(&self) -> &[usize] {
        let idx = self.default_scene.unwrap_or(0);
        match self.scenes.get(idx) {
            Some(scene) => &scene.roots,
            None => &[],
        }
    }
}
