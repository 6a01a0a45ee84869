//! Per-primitive geometry capabilities
//!
//! Welding, simplification, reordering, normal/tangent generation, and
//! attribute quantization. Simplification and cache reordering delegate to
//! meshopt; tangent generation delegates to MikkTSpace.

use glam::Vec3;
use half::f16;
use hashbrown::HashMap;

use scene_doc::{Primitive, Quantization, SceneDocument};

use crate::error::StageError;
use crate::stages::ReorderLevel;

/// Apply a vertex remap to every attribute and the index buffer.
///
/// `remap[old] = new`, with `u32::MAX` marking dropped vertices. Iteration
/// runs in reverse so the lowest old index wins a contested slot.
fn remap_vertices(prim: &mut Primitive, remap: &[u32], new_count: usize) {
    fn remap_attr<T: Copy + Default>(data: &[T], remap: &[u32], new_count: usize) -> Vec<T> {
        let mut out = vec![T::default(); new_count];
        for old in (0..data.len()).rev() {
            let new = remap[old];
            if new != u32::MAX {
                out[new as usize] = data[old];
            }
        }
        out
    }

    prim.positions = remap_attr(&prim.positions, remap, new_count);
    if let Some(normals) = &prim.normals {
        prim.normals = Some(remap_attr(normals, remap, new_count));
    }
    if let Some(tangents) = &prim.tangents {
        prim.tangents = Some(remap_attr(tangents, remap, new_count));
    }
    if let Some(uvs) = &prim.uvs {
        prim.uvs = Some(remap_attr(uvs, remap, new_count));
    }
    if let Some(colors) = &prim.colors {
        prim.colors = Some(remap_attr(colors, remap, new_count));
    }
    if let Some(joints) = &prim.joints {
        prim.joints = Some(remap_attr(joints, remap, new_count));
    }
    if let Some(weights) = &prim.weights {
        prim.weights = Some(remap_attr(weights, remap, new_count));
    }
    for index in &mut prim.indices {
        *index = remap[*index as usize];
    }
}

/// Drop vertices no index references, keeping relative order.
fn compact_primitive(prim: &mut Primitive) {
    let count = prim.positions.len();
    let mut used = vec![false; count];
    for &index in &prim.indices {
        used[index as usize] = true;
    }

    let mut remap = vec![u32::MAX; count];
    let mut next = 0u32;
    for (old, &is_used) in used.iter().enumerate() {
        if is_used {
            remap[old] = next;
            next += 1;
        }
    }

    if (next as usize) < count {
        remap_vertices(prim, &remap, next as usize);
    }
}

#[derive(PartialEq, Eq, Hash)]
struct WeldKey {
    position: [i64; 3],
    normal: Option<[i64; 3]>,
}

fn quantize_component(value: f32, tolerance: f32) -> i64 {
    if tolerance <= 0.0 {
        value.to_bits() as i64
    } else {
        (value / tolerance).round() as i64
    }
}

impl WeldKey {
    fn new(position: [f32; 3], normal: Option<[f32; 3]>, tolerance: f32, tolerance_normal: f32) -> Self {
        Self {
            position: position.map(|c| quantize_component(c, tolerance)),
            normal: normal.map(|n| n.map(|c| quantize_component(c, tolerance_normal))),
        }
    }
}

fn weld_primitive(prim: &mut Primitive, tolerance: f32, tolerance_normal: f32) -> (usize, usize) {
    let count = prim.positions.len();
    let mut remap = vec![u32::MAX; count];
    let mut slots: HashMap<WeldKey, u32> = HashMap::with_capacity(count);
    let mut next = 0u32;

    for i in 0..count {
        let key = WeldKey::new(
            prim.positions[i],
            prim.normals.as_ref().map(|n| n[i]),
            tolerance,
            tolerance_normal,
        );
        let slot = *slots.entry(key).or_insert_with(|| {
            let slot = next;
            next += 1;
            slot
        });
        remap[i] = slot;
    }

    let new_count = next as usize;
    if new_count < count {
        remap_vertices(prim, &remap, new_count);
    }
    (count, new_count)
}

/// Merge coincident vertices within tolerance across every primitive.
pub fn weld(doc: &mut SceneDocument, tolerance: f32, tolerance_normal: f32) -> Result<(), StageError> {
    let mut before = 0usize;
    let mut after = 0usize;

    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            let (prim_before, prim_after) = weld_primitive(prim, tolerance, tolerance_normal);
            before += prim_before;
            after += prim_after;
        }
    }

    tracing::info!("welded {} vertices to {} (tolerance {})", before, after, tolerance);
    Ok(())
}

/// Meshopt index simplification. Primitives at or below `min_points` vertices
/// are left untouched.
pub fn simplify(
    doc: &mut SceneDocument,
    ratio: f32,
    error: f32,
    min_points: usize,
    lock_border: bool,
) -> Result<(), StageError> {
    let mut simplified = 0usize;
    let mut skipped = 0usize;

    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if prim.point_count() <= min_points || prim.indices.len() < 3 {
                skipped += 1;
                continue;
            }
            simplify_primitive(prim, ratio, error, lock_border)?;
            compact_primitive(prim);
            simplified += 1;
        }
    }

    tracing::info!(
        "simplified {} primitives at ratio {} ({} below point threshold)",
        simplified,
        ratio,
        skipped
    );
    Ok(())
}

fn simplify_primitive(
    prim: &mut Primitive,
    ratio: f32,
    error: f32,
    lock_border: bool,
) -> Result<(), StageError> {
    let bytes: &[u8] = bytemuck::cast_slice(&prim.positions);
    let adapter = meshopt::VertexDataAdapter::new(bytes, std::mem::size_of::<[f32; 3]>(), 0)
        .map_err(|e| StageError::Failed(format!("vertex adapter: {e}")))?;

    let target_count = (((prim.indices.len() as f32 * ratio) as usize) / 3).max(1) * 3;
    let mut options = meshopt::SimplifyOptions::empty();
    if lock_border {
        options |= meshopt::SimplifyOptions::LockBorder;
    }

    prim.indices = meshopt::simplify(&prim.indices, &adapter, target_count, error, options, None);
    Ok(())
}

/// Vertex cache reordering; `high` also reorders vertex storage for fetch
/// locality.
pub fn reorder(doc: &mut SceneDocument, level: ReorderLevel) -> Result<(), StageError> {
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if prim.indices.is_empty() {
                continue;
            }
            prim.indices = meshopt::optimize_vertex_cache(&prim.indices, prim.point_count());

            if level == ReorderLevel::High {
                let remap = meshopt::optimize_vertex_fetch_remap(&prim.indices, prim.point_count());
                let new_count = remap.iter().filter(|&&v| v != u32::MAX).count();
                remap_vertices(prim, &remap, new_count);
            }
        }
    }
    Ok(())
}

/// Recompute area-weighted vertex normals. Existing tangents are invalidated.
pub fn recompute_normals(doc: &mut SceneDocument, overwrite: bool) -> Result<(), StageError> {
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if prim.normals.is_some() && !overwrite {
                continue;
            }

            let mut accumulated = vec![Vec3::ZERO; prim.positions.len()];
            for tri in prim.indices.chunks_exact(3) {
                let a = Vec3::from(prim.positions[tri[0] as usize]);
                let b = Vec3::from(prim.positions[tri[1] as usize]);
                let c = Vec3::from(prim.positions[tri[2] as usize]);
                // Cross product magnitude carries the area weighting.
                let face_normal = (b - a).cross(c - a);
                for &index in tri {
                    accumulated[index as usize] += face_normal;
                }
            }

            prim.normals = Some(
                accumulated
                    .into_iter()
                    .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
                    .collect(),
            );
            prim.tangents = None;
        }
    }
    Ok(())
}

struct TangentGeometry<'a> {
    positions: &'a [[f32; 3]],
    normals: &'a [[f32; 3]],
    uvs: &'a [[f32; 2]],
    indices: &'a [u32],
    tangents: Vec<[f32; 4]>,
}

impl TangentGeometry<'_> {
    fn index(&self, face: usize, vert: usize) -> usize {
        self.indices[face * 3 + vert] as usize
    }
}

impl mikktspace::Geometry for TangentGeometry<'_> {
    fn num_faces(&self) -> usize {
        self.indices.len() / 3
    }

    fn num_vertices_of_face(&self, _face: usize) -> usize {
        3
    }

    fn position(&self, face: usize, vert: usize) -> [f32; 3] {
        self.positions[self.index(face, vert)]
    }

    fn normal(&self, face: usize, vert: usize) -> [f32; 3] {
        self.normals[self.index(face, vert)]
    }

    fn tex_coord(&self, face: usize, vert: usize) -> [f32; 2] {
        self.uvs[self.index(face, vert)]
    }

    fn set_tangent_encoded(&mut self, tangent: [f32; 4], face: usize, vert: usize) {
        let index = self.index(face, vert);
        self.tangents[index] = tangent;
    }
}

/// MikkTSpace tangent generation. Primitives without normals or UVs are
/// skipped (there is no tangent basis to derive).
pub fn generate_tangents(doc: &mut SceneDocument) -> Result<(), StageError> {
    let mut generated = 0usize;

    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            let (normals, uvs) = match (&prim.normals, &prim.uvs) {
                (Some(n), Some(u)) => (n, u),
                _ => {
                    tracing::debug!("skipping tangents for primitive without normals/UVs");
                    continue;
                }
            };

            let mut geometry = TangentGeometry {
                positions: &prim.positions,
                normals,
                uvs,
                indices: &prim.indices,
                tangents: vec![[0.0, 0.0, 0.0, 1.0]; prim.positions.len()],
            };

            if !mikktspace::generate_tangents(&mut geometry) {
                return Err(StageError::Failed(
                    "MikkTSpace tangent generation failed".into(),
                ));
            }
            prim.tangents = Some(geometry.tangents);
            generated += 1;
        }
    }

    tracing::info!("generated tangents for {} primitives", generated);
    Ok(())
}

fn quantize_f16(value: &mut f32) {
    *value = f16::from_f32(*value).to_f32();
}

/// Lossy precision quantization: positions always, UVs from level 5, normals
/// and colors from level 8. Leaves a marker so dequantize is meaningful.
pub fn quantize(doc: &mut SceneDocument, level: u8) -> Result<(), StageError> {
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            for position in &mut prim.positions {
                position.iter_mut().for_each(quantize_f16);
            }
            if level >= 5 {
                if let Some(uvs) = &mut prim.uvs {
                    for uv in uvs {
                        uv.iter_mut().for_each(quantize_f16);
                    }
                }
            }
            if level >= 8 {
                if let Some(normals) = &mut prim.normals {
                    for normal in normals {
                        normal.iter_mut().for_each(quantize_f16);
                    }
                }
                if let Some(colors) = &mut prim.colors {
                    for color in colors {
                        color.iter_mut().for_each(quantize_f16);
                    }
                }
            }
            prim.quantization = Some(Quantization { level });
        }
    }
    Ok(())
}

/// Clear quantization markers, restoring full-precision storage on write.
pub fn dequantize(doc: &mut SceneDocument) -> Result<(), StageError> {
    let mut cleared = 0usize;
    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            if prim.quantization.take().is_some() {
                cleared += 1;
            }
        }
    }
    tracing::debug!("cleared quantization on {} primitives", cleared);
    Ok(())
}

/// Zero skin weights below epsilon and renormalize the remainder.
pub fn sparsify(doc: &mut SceneDocument, epsilon: f32) -> Result<(), StageError> {
    let mut zeroed = 0usize;

    for mesh in &mut doc.meshes {
        for prim in &mut mesh.primitives {
            let Some(weights) = &mut prim.weights else {
                continue;
            };
            for weight in weights {
                for w in weight.iter_mut() {
                    if *w > 0.0 && *w < epsilon {
                        *w = 0.0;
                        zeroed += 1;
                    }
                }
                let sum: f32 = weight.iter().sum();
                if sum > 0.0 {
                    weight.iter_mut().for_each(|w| *w /= sum);
                }
            }
        }
    }

    tracing::debug!("zeroed {} sub-epsilon weights", zeroed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_doc::Mesh;

    fn doc_with(prim: Primitive) -> SceneDocument {
        let mut doc = SceneDocument::default();
        doc.meshes.push(Mesh {
            name: None,
            primitives: vec![prim],
        });
        doc
    }

    #[test]
    fn test_weld_merges_exact_duplicates() {
        // Two triangles sharing an edge, written with duplicated vertices.
        let mut doc = doc_with(Primitive {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            indices: vec![0, 1, 2, 3, 4, 5],
            ..Default::default()
        });

        weld(&mut doc, 0.0, 0.0).unwrap();

        let prim = &doc.meshes[0].primitives[0];
        assert_eq!(prim.positions.len(), 4);
        assert_eq!(prim.indices, vec![0, 1, 2, 1, 3, 2]);
    }

    #[test]
    fn test_weld_tolerance_merges_near_vertices() {
        let mut doc = doc_with(Primitive {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.5, 1.0, 0.0],
                [0.50001, 1.00001, 0.0],
            ],
            indices: vec![0, 1, 2, 0, 1, 3],
            ..Default::default()
        });

        weld(&mut doc, 0.001, 0.0).unwrap();
        assert_eq!(doc.meshes[0].primitives[0].positions.len(), 3);
    }

    #[test]
    fn test_simplify_skips_small_primitives() {
        let mut doc = doc_with(Primitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..Default::default()
        });
        let original = doc.meshes[0].primitives[0].clone();

        simplify(&mut doc, 0.5, 0.001, 100, false).unwrap();

        // 3 vertices is far below the 100-point threshold
        assert_eq!(doc.meshes[0].primitives[0], original);
    }

    #[test]
    fn test_normals_are_unit_length() {
        let mut doc = doc_with(Primitive {
            positions: vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
            indices: vec![0, 1, 2],
            ..Default::default()
        });

        recompute_normals(&mut doc, true).unwrap();

        let normals = doc.meshes[0].primitives[0].normals.as_ref().unwrap();
        for n in normals {
            assert!((Vec3::from(*n).length() - 1.0).abs() < 1e-5);
            assert_eq!(*n, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_normals_invalidate_tangents() {
        let mut doc = doc_with(Primitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            tangents: Some(vec![[1.0, 0.0, 0.0, 1.0]; 3]),
            ..Default::default()
        });

        recompute_normals(&mut doc, true).unwrap();
        assert!(doc.meshes[0].primitives[0].tangents.is_none());
    }

    #[test]
    fn test_quantize_sets_marker_and_dequantize_clears() {
        let mut doc = doc_with(Primitive {
            positions: vec![[0.123456789, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            ..Default::default()
        });

        quantize(&mut doc, 7).unwrap();
        let prim = &doc.meshes[0].primitives[0];
        assert_eq!(prim.quantization, Some(Quantization { level: 7 }));
        // f16 precision loss applied
        assert_ne!(prim.positions[0][0], 0.123456789);

        dequantize(&mut doc).unwrap();
        assert!(doc.meshes[0].primitives[0].quantization.is_none());
    }

    #[test]
    fn test_sparsify_renormalizes_weights() {
        let mut doc = doc_with(Primitive {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            indices: vec![0, 1, 2],
            joints: Some(vec![[0, 1, 2, 3]; 3]),
            weights: Some(vec![[0.6, 0.3999, 0.0001, 0.0]; 3]),
            ..Default::default()
        });

        sparsify(&mut doc, 0.001).unwrap();

        let weights = doc.meshes[0].primitives[0].weights.as_ref().unwrap();
        for w in weights {
            assert_eq!(w[2], 0.0);
            let sum: f32 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_compact_drops_unreferenced_vertices() {
        let mut prim = Primitive {
            positions: vec![
                [0.0, 0.0, 0.0],
                [9.0, 9.0, 9.0],
                [1.0, 0.0, 0.0],
                [0.5, 1.0, 0.0],
            ],
            indices: vec![0, 2, 3],
            ..Default::default()
        };

        compact_primitive(&mut prim);

        assert_eq!(prim.positions.len(), 3);
        assert_eq!(prim.indices, vec![0, 1, 2]);
        assert_eq!(prim.positions[1], [1.0, 0.0, 0.0]);
    }
}
