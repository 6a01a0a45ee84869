//! glTF/GLB import

use std::path::Path;

use image::RgbaImage;

use crate::document::{
    AlphaMode, Animation, Channel, ChannelPath, ChannelValues, ImageEncoding, Interpolation,
    Material, Mesh, Node, Primitive, Scene, SceneDocument, Texture,
};
use crate::error::DocError;

/// Read a glTF or GLB file into a scene document.
pub fn read_document(path: &Path) -> Result<SceneDocument, DocError> {
    let (document, buffers, images) = gltf::import(path).map_err(|source| DocError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut doc = SceneDocument::default();

    for gltf_texture in document.textures() {
        doc.textures.push(import_texture(&gltf_texture, &images)?);
    }

    for gltf_material in document.materials() {
        // The implicit default material is reached through primitives with no
        // material index and is not part of this list.
        doc.materials.push(import_material(&gltf_material));
    }

    for gltf_mesh in document.meshes() {
        let mut mesh = Mesh {
            name: gltf_mesh.name().map(str::to_owned),
            primitives: Vec::new(),
        };
        for primitive in gltf_mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                tracing::warn!(
                    "skipping non-triangle primitive (mode {:?}) in mesh {:?}",
                    primitive.mode(),
                    gltf_mesh.name()
                );
                continue;
            }
            mesh.primitives.push(import_primitive(&primitive, &buffers)?);
        }
        doc.meshes.push(mesh);
    }

    for gltf_node in document.nodes() {
        let (translation, rotation, scale) = gltf_node.transform().decomposed();
        doc.nodes.push(Node {
            name: gltf_node.name().map(str::to_owned),
            translation,
            rotation,
            scale,
            mesh: gltf_node.mesh().map(|m| m.index()),
            children: gltf_node.children().map(|c| c.index()).collect(),
        });
    }

    for gltf_scene in document.scenes() {
        doc.scenes.push(Scene {
            name: gltf_scene.name().map(str::to_owned),
            roots: gltf_scene.nodes().map(|n| n.index()).collect(),
        });
    }
    doc.default_scene = document.default_scene().map(|s| s.index());

    for gltf_animation in document.animations() {
        doc.animations
            .push(import_animation(&gltf_animation, &buffers));
    }

    Ok(doc)
}

fn import_primitive(
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
) -> Result<Primitive, DocError> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| DocError::Unsupported("primitive without POSITION attribute".into()))?
        .collect();

    let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|iter| iter.collect());
    let tangents: Option<Vec<[f32; 4]>> = reader.read_tangents().map(|iter| iter.collect());
    let uvs: Option<Vec<[f32; 2]>> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().collect());
    let colors: Option<Vec<[f32; 4]>> = reader
        .read_colors(0)
        .map(|iter| iter.into_rgba_f32().collect());
    let joints: Option<Vec<[u16; 4]>> = reader
        .read_joints(0)
        .map(|iter| iter.into_u16().collect());
    let weights: Option<Vec<[f32; 4]>> = reader
        .read_weights(0)
        .map(|iter| iter.into_f32().collect());

    // Non-indexed geometry gets a sequential index buffer so every later
    // stage can assume indices exist.
    let indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };

    Ok(Primitive {
        positions,
        normals,
        tangents,
        uvs,
        colors,
        joints,
        weights,
        indices,
        material: primitive.material().index(),
        quantization: None,
    })
}

fn import_material(material: &gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();
    Material {
        name: material.name().map(str::to_owned),
        base_color_factor: pbr.base_color_factor(),
        base_color_texture: pbr.base_color_texture().map(|info| info.texture().index()),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        metallic_roughness_texture: pbr
            .metallic_roughness_texture()
            .map(|info| info.texture().index()),
        normal_texture: material.normal_texture().map(|info| info.texture().index()),
        occlusion_texture: material
            .occlusion_texture()
            .map(|info| info.texture().index()),
        emissive_factor: material.emissive_factor(),
        emissive_texture: material
            .emissive_texture()
            .map(|info| info.texture().index()),
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask {
                cutoff: material.alpha_cutoff().unwrap_or(0.5),
            },
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        },
        double_sided: material.double_sided(),
    }
}

fn import_texture(
    texture: &gltf::Texture,
    images: &[gltf::image::Data],
) -> Result<Texture, DocError> {
    let image_index = texture.source().index();
    let data = &images[image_index];
    let image = rgba_from_pixels(data)?;

    // Prefer explicit names, then the source URI stem, for strategy matching.
    let name = texture
        .name()
        .map(str::to_owned)
        .or_else(|| texture.source().name().map(str::to_owned))
        .or_else(|| match texture.source().source() {
            gltf::image::Source::Uri { uri, .. } => Path::new(uri)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            gltf::image::Source::View { .. } => None,
        })
        .unwrap_or_else(|| format!("texture_{}", texture.index()));

    let encoding = match texture.source().source() {
        gltf::image::Source::View { mime_type, .. } if mime_type == "image/jpeg" => {
            ImageEncoding::Jpeg { quality: 85 }
        }
        gltf::image::Source::Uri { uri, .. }
            if uri.ends_with(".jpg") || uri.ends_with(".jpeg") =>
        {
            ImageEncoding::Jpeg { quality: 85 }
        }
        _ => ImageEncoding::Png,
    };

    Ok(Texture {
        name,
        image,
        encoding,
    })
}

/// Expand any of the gltf pixel formats to RGBA8.
fn rgba_from_pixels(data: &gltf::image::Data) -> Result<RgbaImage, DocError> {
    use gltf::image::Format;

    let (width, height) = (data.width, data.height);
    let pixel_count = (width as usize) * (height as usize);
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    match data.format {
        Format::R8 => {
            for p in &data.pixels {
                rgba.extend_from_slice(&[*p, *p, *p, 255]);
            }
        }
        Format::R8G8 => {
            for p in data.pixels.chunks_exact(2) {
                rgba.extend_from_slice(&[p[0], p[1], 0, 255]);
            }
        }
        Format::R8G8B8 => {
            for p in data.pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[p[0], p[1], p[2], 255]);
            }
        }
        Format::R8G8B8A8 => {
            rgba.extend_from_slice(&data.pixels);
        }
        Format::R16 | Format::R16G16 | Format::R16G16B16 | Format::R16G16B16A16 => {
            let channels = match data.format {
                Format::R16 => 1,
                Format::R16G16 => 2,
                Format::R16G16B16 => 3,
                _ => 4,
            };
            for px in data.pixels.chunks_exact(channels * 2) {
                let mut out = [0u8, 0, 0, 255];
                for c in 0..channels {
                    // Keep the high byte of each 16-bit little-endian sample.
                    out[c] = px[c * 2 + 1];
                }
                if channels == 1 {
                    out[1] = out[0];
                    out[2] = out[0];
                }
                rgba.extend_from_slice(&out);
            }
        }
        other => {
            return Err(DocError::Unsupported(format!(
                "texture pixel format {:?}",
                other
            )));
        }
    }

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| DocError::Unsupported("texture dimensions do not match pixel data".into()))
}

fn import_animation(animation: &gltf::Animation, buffers: &[gltf::buffer::Data]) -> Animation {
    let mut channels = Vec::new();

    for channel in animation.channels() {
        let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
        let times: Vec<f32> = match reader.read_inputs() {
            Some(iter) => iter.collect(),
            None => continue,
        };
        let outputs = match reader.read_outputs() {
            Some(outputs) => outputs,
            None => continue,
        };

        use gltf::animation::util::ReadOutputs;
        let (path, values) = match outputs {
            ReadOutputs::Translations(iter) => {
                (ChannelPath::Translation, ChannelValues::Vec3(iter.collect()))
            }
            ReadOutputs::Rotations(rotations) => (
                ChannelPath::Rotation,
                ChannelValues::Quat(rotations.into_f32().collect()),
            ),
            ReadOutputs::Scales(iter) => (ChannelPath::Scale, ChannelValues::Vec3(iter.collect())),
            ReadOutputs::MorphTargetWeights(weights) => (
                ChannelPath::Weights,
                ChannelValues::Scalar(weights.into_f32().collect()),
            ),
        };

        channels.push(Channel {
            target_node: channel.target().node().index(),
            path,
            interpolation: match channel.sampler().interpolation() {
                gltf::animation::Interpolation::Linear => Interpolation::Linear,
                gltf::animation::Interpolation::Step => Interpolation::Step,
                gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
            },
            times,
            values,
        });
    }

    Animation {
        name: animation.name().map(str::to_owned),
        channels,
    }
}
