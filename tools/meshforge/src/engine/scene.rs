//! Scene-graph capabilities
//!
//! Pruning, deduplication, instancing, transform flattening, primitive
//! joining, material palette reduction, vertex color-space correction, and
//! animation keyframe resampling.

use glam::{Mat3, Mat4, Vec3};

use scene_doc::{
    ChannelValues, Interpolation, Material, Mesh, Primitive, SceneDocument, Texture,
};

use crate::error::StageError;
use crate::stages::ColorSpace;

/// Compaction remap over a keep mask: `remap[old] = Some(new)` for kept
/// entries, preserving order.
fn compaction_remap(keep: &[bool]) -> (Vec<Option<usize>>, usize) {
    let mut remap = vec![None; keep.len()];
    let mut next = 0usize;
    for (old, &kept) in keep.iter().enumerate() {
        if kept {
            remap[old] = Some(next);
            next += 1;
        }
    }
    (remap, next)
}

fn retain_by_mask<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    items.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// Node indices targeted by any animation channel.
fn animated_nodes(doc: &SceneDocument) -> Vec<bool> {
    let mut animated = vec![false; doc.nodes.len()];
    for animation in &doc.animations {
        for channel in &animation.channels {
            if let Some(flag) = animated.get_mut(channel.target_node) {
                *flag = true;
            }
        }
    }
    animated
}

/// Drop nodes unreachable from any scene root, then meshes, materials, and
/// textures that nothing references. Animation channels targeting dropped
/// nodes are dropped with them.
pub fn prune(doc: &mut SceneDocument) -> Result<(), StageError> {
    // Reachable nodes.
    let mut reachable = vec![false; doc.nodes.len()];
    let mut stack: Vec<usize> = doc
        .scenes
        .iter()
        .flat_map(|s| s.roots.iter().copied())
        .collect();
    while let Some(index) = stack.pop() {
        if index >= reachable.len() || reachable[index] {
            continue;
        }
        reachable[index] = true;
        stack.extend(doc.nodes[index].children.iter().copied());
    }

    let (node_remap, kept_nodes) = compaction_remap(&reachable);
    let dropped_nodes = doc.nodes.len() - kept_nodes;

    retain_by_mask(&mut doc.nodes, &reachable);
    for node in &mut doc.nodes {
        node.children = node
            .children
            .iter()
            .filter_map(|&c| node_remap.get(c).copied().flatten())
            .collect();
    }
    for scene in &mut doc.scenes {
        scene.roots = scene
            .roots
            .iter()
            .filter_map(|&r| node_remap.get(r).copied().flatten())
            .collect();
    }
    for animation in &mut doc.animations {
        animation.channels.retain_mut(|channel| {
            match node_remap.get(channel.target_node).copied().flatten() {
                Some(new) => {
                    channel.target_node = new;
                    true
                }
                None => false,
            }
        });
    }
    doc.animations.retain(|a| !a.channels.is_empty());

    // Referenced meshes.
    let mut mesh_used = vec![false; doc.meshes.len()];
    for node in &doc.nodes {
        if let Some(mesh) = node.mesh {
            if let Some(flag) = mesh_used.get_mut(mesh) {
                *flag = true;
            }
        }
    }
    let (mesh_remap, kept_meshes) = compaction_remap(&mesh_used);
    let dropped_meshes = doc.meshes.len() - kept_meshes;
    retain_by_mask(&mut doc.meshes, &mesh_used);
    for node in &mut doc.nodes {
        node.mesh = node.mesh.and_then(|m| mesh_remap.get(m).copied().flatten());
    }

    // Referenced materials.
    let mut material_used = vec![false; doc.materials.len()];
    for mesh in &doc.meshes {
        for prim in &mesh.primitives {
            if let Some(material) = prim.material {
                if let Some(flag) = material_used.get_mut(material) {
                    *flag = true;
                }
            }
        }
    }
    let (material_remap, kept_materials) = compaction_remap(&material_used);
    let dropped_materials = doc.materials.len() - kept_materials;
    retain_by_mask(&mut doc.materials, &material_used);
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            prim.material = prim
                .material
                .and_then(|m| material_remap.get(m).copied().flatten());
        }
    }

    // Referenced textures.
    let mut texture_used = vec![false; doc.textures.len()];
    for material in &doc.materials {
        for texture in material.texture_refs() {
            if let Some(flag) = texture_used.get_mut(texture) {
                *flag = true;
            }
        }
    }
    let (texture_remap, kept_textures) = compaction_remap(&texture_used);
    let dropped_textures = doc.textures.len() - kept_textures;
    retain_by_mask(&mut doc.textures, &texture_used);
    for material in &mut doc.materials {
        material.remap_textures(|t| texture_remap.get(t).copied().flatten());
    }

    tracing::info!(
        "pruned {} nodes, {} meshes, {} materials, {} textures",
        dropped_nodes,
        dropped_meshes,
        dropped_materials,
        dropped_textures
    );
    Ok(())
}

fn textures_equal(a: &Texture, b: &Texture) -> bool {
    a.encoding == b.encoding
        && a.image.dimensions() == b.image.dimensions()
        && a.image.as_raw() == b.image.as_raw()
}

fn meshes_equal(a: &Mesh, b: &Mesh) -> bool {
    a.primitives == b.primitives
}

/// Content equality: names are labels, not content.
fn materials_equal(a: &Material, b: &Material) -> bool {
    let strip = |m: &Material| Material {
        name: None,
        ..m.clone()
    };
    strip(a) == strip(b)
}

/// Canonicalize duplicates: `canonical[i]` is the index of the first
/// content-equal entry at or before `i`.
fn canonical_indices<T>(items: &[T], equal: impl Fn(&T, &T) -> bool) -> Vec<usize> {
    let mut canonical: Vec<usize> = (0..items.len()).collect();
    for i in 1..items.len() {
        for j in 0..i {
            if canonical[j] == j && equal(&items[i], &items[j]) {
                canonical[i] = j;
                break;
            }
        }
    }
    canonical
}

/// Drop entries whose canonical index is not themselves, returning the final
/// remap table old -> new.
fn compact_canonical<T>(items: &mut Vec<T>, canonical: &[usize]) -> Vec<usize> {
    let keep: Vec<bool> = canonical.iter().enumerate().map(|(i, &c)| c == i).collect();
    let (remap, _) = compaction_remap(&keep);
    retain_by_mask(items, &keep);
    canonical
        .iter()
        .map(|&c| remap[c].expect("canonical entry kept"))
        .collect()
}

/// Content-hash deduplication of textures, materials, and meshes.
pub fn dedup(
    doc: &mut SceneDocument,
    meshes: bool,
    materials: bool,
    textures: bool,
) -> Result<(), StageError> {
    let mut removed = [0usize; 3];

    if textures {
        let canonical = canonical_indices(&doc.textures, textures_equal);
        removed[0] = canonical.iter().enumerate().filter(|(i, &c)| c != *i).count();
        let remap = compact_canonical(&mut doc.textures, &canonical);
        for material in &mut doc.materials {
            material.remap_textures(|t| remap.get(t).copied());
        }
    }

    if materials {
        let canonical = canonical_indices(&doc.materials, materials_equal);
        removed[1] = canonical.iter().enumerate().filter(|(i, &c)| c != *i).count();
        let remap = compact_canonical(&mut doc.materials, &canonical);
        for mesh in &mut doc.meshes {
            for prim in &mut mesh.primitives {
                prim.material = prim.material.map(|m| remap[m]);
            }
        }
    }

    if meshes {
        let canonical = canonical_indices(&doc.meshes, meshes_equal);
        removed[2] = canonical.iter().enumerate().filter(|(i, &c)| c != *i).count();
        let remap = compact_canonical(&mut doc.meshes, &canonical);
        for node in &mut doc.nodes {
            node.mesh = node.mesh.map(|m| remap[m]);
        }
    }

    tracing::info!(
        "dedup removed {} textures, {} materials, {} meshes",
        removed[0],
        removed[1],
        removed[2]
    );
    Ok(())
}

/// Collapse duplicate mesh copies referenced by at least `min` nodes into a
/// shared mesh. Nodes driven by animations are left alone.
pub fn instance(doc: &mut SceneDocument, min: usize) -> Result<(), StageError> {
    let animated = animated_nodes(doc);
    let canonical = canonical_indices(&doc.meshes, meshes_equal);

    // Count static nodes per canonical mesh.
    let mut counts = vec![0usize; doc.meshes.len()];
    for (index, node) in doc.nodes.iter().enumerate() {
        if animated[index] {
            continue;
        }
        if let Some(mesh) = node.mesh {
            counts[canonical[mesh]] += 1;
        }
    }

    let mut shared = 0usize;
    for (index, node) in doc.nodes.iter_mut().enumerate() {
        if animated[index] {
            continue;
        }
        if let Some(mesh) = node.mesh {
            let target = canonical[mesh];
            if counts[target] >= min && mesh != target {
                node.mesh = Some(target);
                shared += 1;
            }
        }
    }

    // Drop mesh copies that lost their last reference.
    let mut used = vec![false; doc.meshes.len()];
    for node in &doc.nodes {
        if let Some(mesh) = node.mesh {
            used[mesh] = true;
        }
    }
    let (remap, _) = compaction_remap(&used);
    retain_by_mask(&mut doc.meshes, &used);
    for node in &mut doc.nodes {
        node.mesh = node.mesh.and_then(|m| remap[m]);
    }

    tracing::info!("instanced {} node references", shared);
    Ok(())
}

fn bake_transform(prim: &mut Primitive, matrix: Mat4) {
    let normal_matrix = Mat3::from_mat4(matrix).inverse().transpose();

    for position in &mut prim.positions {
        *position = matrix.transform_point3(Vec3::from(*position)).to_array();
    }
    if let Some(normals) = &mut prim.normals {
        for normal in normals.iter_mut() {
            let n = normal_matrix * Vec3::from(*normal);
            *normal = n.try_normalize().unwrap_or(Vec3::Y).to_array();
        }
    }
    if let Some(tangents) = &mut prim.tangents {
        for tangent in tangents.iter_mut() {
            let t = Mat3::from_mat4(matrix) * Vec3::new(tangent[0], tangent[1], tangent[2]);
            let t = t.try_normalize().unwrap_or(Vec3::X);
            tangent[0] = t.x;
            tangent[1] = t.y;
            tangent[2] = t.z;
        }
    }
}

/// Bake static node transforms into vertex data.
///
/// Only fully static subtrees are baked: a node qualifies when neither it nor
/// any descendant is an animation target, and baking is relative to the
/// nearest ancestor that keeps its transform, so animated subtrees are
/// unaffected. Shared meshes are copied before baking.
pub fn flatten(doc: &mut SceneDocument) -> Result<(), StageError> {
    let animated = animated_nodes(doc);

    // subtree_dynamic[i]: node i or any descendant is animated.
    fn subtree_dynamic(
        index: usize,
        nodes: &[scene_doc::Node],
        animated: &[bool],
        memo: &mut [Option<bool>],
    ) -> bool {
        if let Some(value) = memo[index] {
            return value;
        }
        let mut dynamic = animated[index];
        for &child in &nodes[index].children {
            dynamic |= subtree_dynamic(child, nodes, animated, memo);
        }
        memo[index] = Some(dynamic);
        dynamic
    }

    let mut memo = vec![None; doc.nodes.len()];
    for index in 0..doc.nodes.len() {
        subtree_dynamic(index, &doc.nodes, &animated, &mut memo);
    }
    let dynamic: Vec<bool> = memo.iter().map(|m| m.unwrap_or(false)).collect();

    // Reference counts decide when a mesh must be copied before baking.
    let mut mesh_refs = vec![0usize; doc.meshes.len()];
    for node in &doc.nodes {
        if let Some(mesh) = node.mesh {
            mesh_refs[mesh] += 1;
        }
    }

    let mut baked = 0usize;
    // (node, transform relative to the nearest kept ancestor)
    let mut stack: Vec<(usize, Mat4)> = doc
        .scenes
        .iter()
        .flat_map(|s| s.roots.iter().map(|&r| (r, Mat4::IDENTITY)))
        .collect();

    while let Some((index, parent_acc)) = stack.pop() {
        if dynamic[index] {
            // Node keeps its transform; children accumulate from scratch.
            let children = doc.nodes[index].children.clone();
            stack.extend(children.into_iter().map(|c| (c, Mat4::IDENTITY)));
            continue;
        }

        let acc = parent_acc * doc.nodes[index].local_matrix();

        if let Some(mesh_index) = doc.nodes[index].mesh {
            if acc != Mat4::IDENTITY {
                let target = if mesh_refs[mesh_index] > 1 {
                    mesh_refs[mesh_index] -= 1;
                    doc.meshes.push(doc.meshes[mesh_index].clone());
                    let copy = doc.meshes.len() - 1;
                    doc.nodes[index].mesh = Some(copy);
                    copy
                } else {
                    mesh_index
                };
                for prim in &mut doc.meshes[target].primitives {
                    bake_transform(prim, acc);
                }
                baked += 1;
            }
        }

        let node = &mut doc.nodes[index];
        node.translation = [0.0; 3];
        node.rotation = [0.0, 0.0, 0.0, 1.0];
        node.scale = [1.0; 3];

        let children = node.children.clone();
        stack.extend(children.into_iter().map(|c| (c, acc)));
    }

    tracing::info!("flattened {} mesh transforms", baked);
    Ok(())
}

/// Attribute-shape signature; primitives only join when it matches.
fn join_signature(prim: &Primitive) -> (Option<usize>, bool, bool, bool, bool, bool, bool) {
    (
        prim.material,
        prim.normals.is_some(),
        prim.tangents.is_some(),
        prim.uvs.is_some(),
        prim.colors.is_some(),
        prim.joints.is_some(),
        prim.weights.is_some(),
    )
}

fn concat_primitive(target: &mut Primitive, src: &Primitive) {
    let offset = target.positions.len() as u32;
    target.positions.extend_from_slice(&src.positions);
    if let (Some(t), Some(s)) = (&mut target.normals, &src.normals) {
        t.extend_from_slice(s);
    }
    if let (Some(t), Some(s)) = (&mut target.tangents, &src.tangents) {
        t.extend_from_slice(s);
    }
    if let (Some(t), Some(s)) = (&mut target.uvs, &src.uvs) {
        t.extend_from_slice(s);
    }
    if let (Some(t), Some(s)) = (&mut target.colors, &src.colors) {
        t.extend_from_slice(s);
    }
    if let (Some(t), Some(s)) = (&mut target.joints, &src.joints) {
        t.extend_from_slice(s);
    }
    if let (Some(t), Some(s)) = (&mut target.weights, &src.weights) {
        t.extend_from_slice(s);
    }
    target.indices.extend(src.indices.iter().map(|&i| i + offset));
}

/// Concatenate primitives sharing a material and attribute shape.
///
/// Only meshes on static, identity-transform, singly-referenced nodes are
/// joined (flatten puts eligible meshes into exactly that state).
pub fn join(doc: &mut SceneDocument, keep_named: bool) -> Result<(), StageError> {
    let animated = animated_nodes(doc);

    let mut mesh_refs = vec![0usize; doc.meshes.len()];
    for node in &doc.nodes {
        if let Some(mesh) = node.mesh {
            mesh_refs[mesh] += 1;
        }
    }

    // (node index, mesh index) candidates.
    let candidates: Vec<(usize, usize)> = doc
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(index, node)| {
            let mesh = node.mesh?;
            let eligible = !animated[index]
                && node.is_identity()
                && mesh_refs[mesh] == 1
                && !(keep_named && doc.meshes[mesh].name.is_some());
            eligible.then_some((index, mesh))
        })
        .collect();

    if candidates.len() < 2 {
        tracing::debug!("join: fewer than two eligible meshes");
        return Ok(());
    }

    // Group primitives by signature, concatenating in candidate order.
    let mut groups: Vec<(
        (Option<usize>, bool, bool, bool, bool, bool, bool),
        Primitive,
    )> = Vec::new();
    for &(_, mesh_index) in &candidates {
        for prim in &doc.meshes[mesh_index].primitives {
            let signature = join_signature(prim);
            match groups.iter_mut().find(|(s, _)| *s == signature) {
                Some((_, target)) => concat_primitive(target, prim),
                None => groups.push((signature, prim.clone())),
            }
        }
    }

    let joined_mesh = Mesh {
        name: None,
        primitives: groups.into_iter().map(|(_, prim)| prim).collect(),
    };

    // First candidate node carries the joined mesh; the rest are emptied.
    let consumed: Vec<usize> = candidates.iter().map(|&(_, mesh)| mesh).collect();
    doc.meshes.push(joined_mesh);
    let joined_index = doc.meshes.len() - 1;
    doc.nodes[candidates[0].0].mesh = Some(joined_index);
    for &(node_index, _) in &candidates[1..] {
        doc.nodes[node_index].mesh = None;
    }

    // Drop the consumed source meshes.
    let mut keep = vec![true; doc.meshes.len()];
    for mesh_index in consumed {
        keep[mesh_index] = false;
    }
    let (remap, _) = compaction_remap(&keep);
    retain_by_mask(&mut doc.meshes, &keep);
    for node in &mut doc.nodes {
        node.mesh = node.mesh.and_then(|m| remap[m]);
    }

    tracing::info!("joined {} meshes", candidates.len());
    Ok(())
}

fn quantize_unorm(value: f32, steps: f32) -> f32 {
    (value.clamp(0.0, 1.0) * steps).round() / steps
}

/// Merge materials identical after base-color quantization (5 bits per
/// channel). A no-op below `min` distinct materials.
pub fn palette(doc: &mut SceneDocument, min: usize) -> Result<(), StageError> {
    if doc.materials.len() < min {
        tracing::debug!("palette: fewer than {} materials, skipping", min);
        return Ok(());
    }

    for material in &mut doc.materials {
        for c in &mut material.base_color_factor {
            *c = quantize_unorm(*c, 31.0);
        }
        for c in &mut material.emissive_factor {
            *c = quantize_unorm(*c, 31.0);
        }
    }

    let canonical = canonical_indices(&doc.materials, materials_equal);
    let merged = canonical.iter().enumerate().filter(|(i, &c)| c != *i).count();
    let remap = compact_canonical(&mut doc.materials, &canonical);
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            prim.material = prim.material.map(|m| remap[m]);
        }
    }

    tracing::info!("palette merged {} materials", merged);
    Ok(())
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Convert COLOR_0 vertex colors from the input color space to linear.
pub fn color_space(doc: &mut SceneDocument, input: ColorSpace) -> Result<(), StageError> {
    if input == ColorSpace::Linear {
        return Ok(());
    }

    let mut converted = 0usize;
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if let Some(colors) = &mut prim.colors {
                for color in colors.iter_mut() {
                    // Alpha stays linear.
                    for c in color.iter_mut().take(3) {
                        *c = srgb_to_linear(*c);
                    }
                }
                converted += 1;
            }
        }
    }

    tracing::debug!("converted vertex colors on {} primitives", converted);
    Ok(())
}

fn resample_track<T: Copy>(
    times: &mut Vec<f32>,
    values: &mut Vec<T>,
    step: bool,
    tolerance: f32,
    lerp: impl Fn(T, T, f32) -> T,
    delta: impl Fn(T, T) -> f32,
) -> usize {
    if times.len() != values.len() || times.len() <= 2 {
        return 0;
    }

    let mut keep = vec![true; times.len()];
    let mut last = 0usize;
    for i in 1..times.len() - 1 {
        let next = i + 1;
        let span = times[next] - times[last];
        if span <= 0.0 {
            last = i;
            continue;
        }
        let predicted = if step {
            values[last]
        } else {
            let t = (times[i] - times[last]) / span;
            lerp(values[last], values[next], t)
        };
        if delta(predicted, values[i]) <= tolerance {
            keep[i] = false;
        } else {
            last = i;
        }
    }

    let removed = keep.iter().filter(|&&k| !k).count();
    if removed > 0 {
        let mut index = 0;
        times.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        let mut index = 0;
        values.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
    }
    removed
}

fn lerp_array<const N: usize>(a: [f32; N], b: [f32; N], t: f32) -> [f32; N] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

fn delta_array<const N: usize>(a: [f32; N], b: [f32; N]) -> f32 {
    (0..N).fold(0.0f32, |acc, i| acc.max((a[i] - b[i]).abs()))
}

/// Remove animation keyframes that are interpolable from their neighbors.
/// Cubic-spline channels are left untouched.
pub fn resample(doc: &mut SceneDocument, tolerance: f32) -> Result<(), StageError> {
    let mut removed = 0usize;

    for animation in &mut doc.animations {
        for channel in &mut animation.channels {
            let step = match channel.interpolation {
                Interpolation::Linear => false,
                Interpolation::Step => true,
                Interpolation::CubicSpline => continue,
            };

            removed += match &mut channel.values {
                ChannelValues::Vec3(values) => resample_track(
                    &mut channel.times,
                    values,
                    step,
                    tolerance,
                    lerp_array,
                    delta_array,
                ),
                ChannelValues::Quat(values) => resample_track(
                    &mut channel.times,
                    values,
                    step,
                    tolerance,
                    lerp_array,
                    delta_array,
                ),
                ChannelValues::Scalar(values) => resample_track(
                    &mut channel.times,
                    values,
                    step,
                    tolerance,
                    |a, b, t| a + (b - a) * t,
                    |a, b| (a - b).abs(),
                ),
            };
        }
    }

    tracing::info!("resampled animations, removed {} keyframes", removed);
    Ok(())
}
