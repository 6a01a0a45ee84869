//! glTF/GLB export
//!
//! Rebuilds glTF JSON from the document model and writes either a single GLB
//! (JSON chunk + binary chunk) or a .gltf with a sidecar .bin. Images are
//! embedded as buffer views or written as separate files, per `WriteOptions`.

use std::io::Cursor;
use std::path::Path;

use gltf_json as json;
use gltf_json::validation::Checked::Valid;
use image::{DynamicImage, ImageEncoder};
use std::collections::BTreeMap;

use crate::buffer::BufferBuilder;
use crate::document::{
    AlphaMode, Animation, ChannelPath, ChannelValues, ImageEncoding, Interpolation, Material,
    SceneDocument, Texture,
};
use crate::error::DocError;

/// Per-format write options, passed through opaquely by the output resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write a single binary GLB instead of JSON + sidecar .bin.
    pub binary: bool,
    /// Pretty-print the JSON (text format only).
    pub pretty: bool,
    /// Embed images into the binary buffer instead of separate files.
    pub embed_images: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            binary: true,
            pretty: false,
            embed_images: true,
        }
    }
}

/// Write a scene document to `path`.
pub fn write_document(
    path: &Path,
    doc: &SceneDocument,
    options: &WriteOptions,
) -> Result<(), DocError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DocError::io(parent, e))?;
        }
    }

    let mut buffer = BufferBuilder::new();
    let embed_images = options.binary || options.embed_images;
    let mut external_images: Vec<(String, Vec<u8>)> = Vec::new();

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());

    let mut images = Vec::new();
    let mut textures = Vec::new();
    for (index, texture) in doc.textures.iter().enumerate() {
        let encoded = encode_texture(texture)?;
        let (ext, mime) = match texture.encoding {
            ImageEncoding::Png => ("png", "image/png"),
            ImageEncoding::Jpeg { .. } => ("jpg", "image/jpeg"),
        };

        let image = if embed_images {
            let view = buffer.push_image(&encoded);
            json::Image {
                buffer_view: Some(view),
                mime_type: Some(json::image::MimeType(mime.to_string())),
                name: Some(texture.name.clone()),
                uri: None,
                extensions: Default::default(),
                extras: Default::default(),
            }
        } else {
            let file_name = format!("{}_{}.{}", stem, sanitize(&texture.name), ext);
            external_images.push((file_name.clone(), encoded));
            json::Image {
                buffer_view: None,
                mime_type: None,
                name: Some(texture.name.clone()),
                uri: Some(file_name),
                extensions: Default::default(),
                extras: Default::default(),
            }
        };
        images.push(image);

        textures.push(json::Texture {
            name: Some(texture.name.clone()),
            sampler: None,
            source: json::Index::new(index as u32),
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    let mut meshes = Vec::new();
    for mesh in &doc.meshes {
        let mut primitives = Vec::new();
        for prim in &mesh.primitives {
            let mut attributes = BTreeMap::new();
            attributes.insert(
                Valid(json::mesh::Semantic::Positions),
                buffer.pack_positions(&prim.positions).as_json_index(),
            );
            if let Some(normals) = &prim.normals {
                attributes.insert(
                    Valid(json::mesh::Semantic::Normals),
                    buffer.pack_vec3(normals).as_json_index(),
                );
            }
            if let Some(tangents) = &prim.tangents {
                attributes.insert(
                    Valid(json::mesh::Semantic::Tangents),
                    buffer.pack_vec4(tangents).as_json_index(),
                );
            }
            if let Some(uvs) = &prim.uvs {
                attributes.insert(
                    Valid(json::mesh::Semantic::TexCoords(0)),
                    buffer.pack_vec2(uvs).as_json_index(),
                );
            }
            if let Some(colors) = &prim.colors {
                attributes.insert(
                    Valid(json::mesh::Semantic::Colors(0)),
                    buffer.pack_vec4(colors).as_json_index(),
                );
            }
            if let Some(joints) = &prim.joints {
                attributes.insert(
                    Valid(json::mesh::Semantic::Joints(0)),
                    buffer.pack_joints(joints).as_json_index(),
                );
            }
            if let Some(weights) = &prim.weights {
                attributes.insert(
                    Valid(json::mesh::Semantic::Weights(0)),
                    buffer.pack_vec4(weights).as_json_index(),
                );
            }

            primitives.push(json::mesh::Primitive {
                attributes,
                indices: Some(buffer.pack_indices(&prim.indices).as_json_index()),
                material: prim.material.map(|m| json::Index::new(m as u32)),
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
                extensions: Default::default(),
                extras: Default::default(),
            });
        }

        meshes.push(json::Mesh {
            name: mesh.name.clone(),
            primitives,
            weights: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    let nodes: Vec<json::Node> = doc.nodes.iter().map(export_node).collect();

    let scenes: Vec<json::Scene> = doc
        .scenes
        .iter()
        .map(|scene| json::Scene {
            name: scene.name.clone(),
            nodes: scene.roots.iter().map(|&n| json::Index::new(n as u32)).collect(),
            extensions: Default::default(),
            extras: Default::default(),
        })
        .collect();

    let materials: Vec<json::Material> = doc.materials.iter().map(export_material).collect();

    let animations: Vec<json::Animation> = doc
        .animations
        .iter()
        .map(|animation| export_animation(animation, &mut buffer))
        .collect();

    let (buffer_data, views, accessors) = buffer.into_parts();

    let buffers = vec![json::Buffer {
        byte_length: (buffer_data.len() as u64).into(),
        name: None,
        uri: if options.binary {
            None
        } else {
            Some(format!("{}.bin", stem))
        },
        extensions: Default::default(),
        extras: Default::default(),
    }];

    let root = json::Root {
        accessors,
        animations,
        asset: json::Asset {
            copyright: None,
            generator: Some(concat!("meshforge ", env!("CARGO_PKG_VERSION")).to_string()),
            min_version: None,
            version: "2.0".to_string(),
            extensions: Default::default(),
            extras: Default::default(),
        },
        buffers,
        buffer_views: views,
        cameras: Vec::new(),
        extensions: Default::default(),
        extensions_required: Vec::new(),
        extensions_used: Vec::new(),
        extras: Default::default(),
        images,
        materials,
        meshes,
        nodes,
        samplers: Vec::new(),
        scene: doc
            .default_scene
            .or(if doc.scenes.is_empty() { None } else { Some(0) })
            .map(|s| json::Index::new(s as u32)),
        scenes,
        skins: Vec::new(),
        textures,
    };

    if options.binary {
        let glb = assemble_glb(&root, &buffer_data)?;
        std::fs::write(path, glb).map_err(|e| DocError::io(path, e))?;
    } else {
        let json_string = if options.pretty {
            json::serialize::to_string_pretty(&root)?
        } else {
            json::serialize::to_string(&root)?
        };
        std::fs::write(path, json_string).map_err(|e| DocError::io(path, e))?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let bin_path = parent.join(format!("{}.bin", stem));
        std::fs::write(&bin_path, &buffer_data).map_err(|e| DocError::io(&bin_path, e))?;

        for (file_name, bytes) in &external_images {
            let image_path = parent.join(file_name);
            std::fs::write(&image_path, bytes).map_err(|e| DocError::io(&image_path, e))?;
        }
    }

    Ok(())
}

fn export_node(node: &crate::document::Node) -> json::Node {
    json::Node {
        camera: None,
        children: if node.children.is_empty() {
            None
        } else {
            Some(
                node.children
                    .iter()
                    .map(|&c| json::Index::new(c as u32))
                    .collect(),
            )
        },
        matrix: None,
        mesh: node.mesh.map(|m| json::Index::new(m as u32)),
        name: node.name.clone(),
        rotation: if node.rotation == [0.0, 0.0, 0.0, 1.0] {
            None
        } else {
            Some(json::scene::UnitQuaternion(node.rotation))
        },
        scale: if node.scale == [1.0; 3] {
            None
        } else {
            Some(node.scale)
        },
        translation: if node.translation == [0.0; 3] {
            None
        } else {
            Some(node.translation)
        },
        skin: None,
        weights: None,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn export_material(material: &Material) -> json::Material {
    let info = |index: Option<usize>| {
        index.map(|i| json::texture::Info {
            index: json::Index::new(i as u32),
            tex_coord: 0,
            extensions: Default::default(),
            extras: Default::default(),
        })
    };

    json::Material {
        name: material.name.clone(),
        alpha_cutoff: match material.alpha_mode {
            AlphaMode::Mask { cutoff } => Some(json::material::AlphaCutoff(cutoff)),
            _ => None,
        },
        alpha_mode: Valid(match material.alpha_mode {
            AlphaMode::Opaque => json::material::AlphaMode::Opaque,
            AlphaMode::Mask { .. } => json::material::AlphaMode::Mask,
            AlphaMode::Blend => json::material::AlphaMode::Blend,
        }),
        double_sided: material.double_sided,
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_factor: json::material::PbrBaseColorFactor(material.base_color_factor),
            base_color_texture: info(material.base_color_texture),
            metallic_factor: json::material::StrengthFactor(material.metallic_factor),
            roughness_factor: json::material::StrengthFactor(material.roughness_factor),
            metallic_roughness_texture: info(material.metallic_roughness_texture),
            extensions: Default::default(),
            extras: Default::default(),
        },
        normal_texture: material.normal_texture.map(|i| json::material::NormalTexture {
            index: json::Index::new(i as u32),
            scale: 1.0,
            tex_coord: 0,
            extensions: Default::default(),
            extras: Default::default(),
        }),
        occlusion_texture: material
            .occlusion_texture
            .map(|i| json::material::OcclusionTexture {
                index: json::Index::new(i as u32),
                strength: json::material::StrengthFactor(1.0),
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
        emissive_texture: info(material.emissive_texture),
        emissive_factor: json::material::EmissiveFactor(material.emissive_factor),
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn export_animation(animation: &Animation, buffer: &mut BufferBuilder) -> json::Animation {
    let mut samplers = Vec::new();
    let mut channels = Vec::new();

    for channel in &animation.channels {
        let input = buffer.pack_times(&channel.times);
        let output = match &channel.values {
            ChannelValues::Vec3(values) => buffer.pack_vec3(values),
            ChannelValues::Quat(values) => buffer.pack_vec4(values),
            ChannelValues::Scalar(values) => buffer.pack_scalars(values),
        };

        samplers.push(json::animation::Sampler {
            input: input.as_json_index(),
            interpolation: Valid(match channel.interpolation {
                Interpolation::Linear => json::animation::Interpolation::Linear,
                Interpolation::Step => json::animation::Interpolation::Step,
                Interpolation::CubicSpline => json::animation::Interpolation::CubicSpline,
            }),
            output: output.as_json_index(),
            extensions: Default::default(),
            extras: Default::default(),
        });
        channels.push(json::animation::Channel {
            sampler: json::Index::new(samplers.len() as u32 - 1),
            target: json::animation::Target {
                node: json::Index::new(channel.target_node as u32),
                path: Valid(match channel.path {
                    ChannelPath::Translation => json::animation::Property::Translation,
                    ChannelPath::Rotation => json::animation::Property::Rotation,
                    ChannelPath::Scale => json::animation::Property::Scale,
                    ChannelPath::Weights => json::animation::Property::MorphTargetWeights,
                }),
                extensions: Default::default(),
                extras: Default::default(),
            },
            extensions: Default::default(),
            extras: Default::default(),
        });
    }

    json::Animation {
        name: animation.name.clone(),
        channels,
        samplers,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

/// Make a texture name safe for use as a file name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Encode a texture's pixels with its target encoding.
fn encode_texture(texture: &Texture) -> Result<Vec<u8>, DocError> {
    let mut cursor = Cursor::new(Vec::new());
    let (width, height) = texture.image.dimensions();

    match texture.encoding {
        ImageEncoding::Png => {
            image::codecs::png::PngEncoder::new(&mut cursor).write_image(
                texture.image.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgba8,
            )?;
        }
        ImageEncoding::Jpeg { quality } => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(texture.image.clone()).to_rgb8();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality).write_image(
                rgb.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(cursor.into_inner())
}

/// Assemble a GLB binary from the JSON root and buffer data.
fn assemble_glb(root: &json::Root, buffer_data: &[u8]) -> Result<Vec<u8>, DocError> {
    let json_string = json::serialize::to_string(root)?;
    let json_bytes = json_string.as_bytes();

    let json_padding = (4 - (json_bytes.len() % 4)) % 4;
    let json_chunk_length = json_bytes.len() + json_padding;

    let buffer_padding = (4 - (buffer_data.len() % 4)) % 4;
    let buffer_chunk_length = buffer_data.len() + buffer_padding;

    let total_length = 12 + 8 + json_chunk_length + 8 + buffer_chunk_length;
    let mut glb = Vec::with_capacity(total_length);

    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total_length as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
    glb.extend_from_slice(json_bytes);
    for _ in 0..json_padding {
        glb.push(0x20);
    }

    glb.extend_from_slice(&(buffer_chunk_length as u32).to_le_bytes());
    glb.extend_from_slice(&0x004E4942u32.to_le_bytes()); // "BIN\0"
    glb.extend_from_slice(buffer_data);
    for _ in 0..buffer_padding {
        glb.push(0);
    }

    Ok(glb)
}
