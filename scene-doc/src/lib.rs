//! scene-doc - in-memory glTF scene documents
//!
//! Provides the document model mutated by the meshforge pipeline: a scene
//! graph of nodes, meshes, materials, textures, and animations, with glTF/GLB
//! import and export. The model is deliberately compact - skins, cameras, and
//! lights are not carried (see DESIGN.md).

pub mod buffer;
pub mod document;
pub mod error;
pub mod export;
pub mod import;

pub use document::{
    AlphaMode, Animation, Channel, ChannelPath, ChannelValues, ComplexityMetrics, ImageEncoding,
    Interpolation, Material, Mesh, Node, Primitive, Quantization, Scene, SceneDocument, Texture,
};
pub use error::DocError;
pub use export::{write_document, WriteOptions};
pub use import::read_document;
