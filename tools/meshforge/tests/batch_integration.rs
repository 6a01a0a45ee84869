//! End-to-end batch tests: real documents through the standard engine and
//! default pipeline, written to disk and read back.

use std::path::Path;

use image::RgbaImage;
use meshforge::batch::{run_batch, BatchOptions};
use meshforge::engine::StandardEngine;
use meshforge::output::{DirectoryLayout, OutputConfig, OutputFormat};
use meshforge::pipeline::Pipeline;
use meshforge::stages::{ReorderLevel, StageDescriptor};
use scene_doc::{
    ImageEncoding, Material, Mesh, Node, Primitive, Scene, SceneDocument, Texture, WriteOptions,
};

/// A quad with two materials, a texture, and a transformed node - enough
/// surface for every scene stage to do real work.
fn build_scene() -> SceneDocument {
    let mut doc = SceneDocument::default();

    doc.textures.push(Texture {
        name: "crate_albedo".to_string(),
        image: RgbaImage::from_pixel(300, 300, image::Rgba([180, 90, 40, 255])),
        encoding: ImageEncoding::Png,
    });
    doc.materials.push(Material {
        name: Some("crate".to_string()),
        base_color_texture: Some(0),
        ..Default::default()
    });
    doc.materials.push(Material {
        name: Some("crate_copy".to_string()),
        base_color_texture: Some(0),
        ..Default::default()
    });

    let quad = |material: Option<usize>| Primitive {
        positions: vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        normals: Some(vec![[0.0, 0.0, 1.0]; 4]),
        uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        indices: vec![0, 1, 2, 0, 2, 3],
        material,
        ..Default::default()
    };

    doc.meshes.push(Mesh {
        name: Some("quad_a".to_string()),
        primitives: vec![quad(Some(0))],
    });
    doc.meshes.push(Mesh {
        name: Some("quad_b".to_string()),
        primitives: vec![quad(Some(1))],
    });

    doc.nodes.push(Node {
        name: Some("a".to_string()),
        mesh: Some(0),
        ..Default::default()
    });
    doc.nodes.push(Node {
        name: Some("b".to_string()),
        translation: [2.0, 0.0, 0.0],
        mesh: Some(1),
        ..Default::default()
    });
    // Unreachable node for prune to drop.
    doc.nodes.push(Node {
        name: Some("orphan".to_string()),
        ..Default::default()
    });

    doc.scenes.push(Scene {
        name: Some("Scene".to_string()),
        roots: vec![0, 1],
    });
    doc
}

fn write_scene(path: &Path) {
    scene_doc::write_document(path, &build_scene(), &WriteOptions::default()).unwrap();
}

#[test]
fn default_pipeline_runs_end_to_end() {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    write_scene(&source.path().join("scene.glb"));

    let options = BatchOptions::default();
    let stats = run_batch(
        source.path(),
        target.path(),
        &options,
        &StandardEngine::default(),
    )
    .unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);

    let out = scene_doc::read_document(&target.path().join("scene.glb")).unwrap();
    // Orphan node pruned, duplicate material merged by palette/dedup.
    assert_eq!(out.nodes.len(), 2);
    assert_eq!(out.materials.len(), 1);
    assert_eq!(out.textures.len(), 1);
    // Albedo strategy rounds up: 300 -> 512.
    assert_eq!(out.textures[0].dimensions(), (512, 512));
    // Tangents generated by the final stage.
    for mesh in &out.meshes {
        for prim in &mesh.primitives {
            assert!(prim.tangents.is_some());
        }
    }
}

#[test]
fn geometry_stages_preserve_triangle_structure() {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    write_scene(&source.path().join("scene.glb"));

    let options = BatchOptions {
        pipeline: Pipeline::new(vec![
            StageDescriptor::Weld {
                tolerance: 1e-4,
                tolerance_normal: 0.25,
            },
            StageDescriptor::Reorder {
                level: ReorderLevel::High,
            },
        ])
        .unwrap(),
        ..Default::default()
    };
    run_batch(
        source.path(),
        target.path(),
        &options,
        &StandardEngine::default(),
    )
    .unwrap();

    let out = scene_doc::read_document(&target.path().join("scene.glb")).unwrap();
    for mesh in &out.meshes {
        for prim in &mesh.primitives {
            assert_eq!(prim.indices.len() % 3, 0);
            assert_eq!(prim.indices.len(), 6);
            for &index in &prim.indices {
                assert!((index as usize) < prim.positions.len());
            }
        }
    }
}

#[test]
fn separate_layout_with_lod_sidecar() {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    write_scene(&source.path().join("props/crate.glb"));

    let options = BatchOptions {
        pipeline: Pipeline::new(vec![StageDescriptor::Prune]).unwrap(),
        output: OutputConfig {
            format: OutputFormat::Both,
            directory: DirectoryLayout::Separate,
            ..Default::default()
        },
        generate_lod: true,
        lod_levels: Some(vec![1.0, 0.5]),
        ..Default::default()
    };
    let stats = run_batch(
        source.path(),
        target.path(),
        &options,
        &StandardEngine::default(),
    )
    .unwrap();

    assert_eq!(stats.processed, 1);
    assert!(target.path().join("glb/props/crate.glb").exists());
    assert!(target.path().join("gltf/props/crate.gltf").exists());
    // LOD set lands next to the primary (GLB) output.
    assert!(target.path().join("glb/props/crate_lod_1.glb").exists());
    assert!(target.path().join("glb/props/crate_lod_0_5.glb").exists());

    let sidecar = target.path().join("glb/props/crate_lod_config.json");
    let index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(index["model"], "crate");
    assert_eq!(index["levels"][0]["distanceThreshold"], 100);
    assert_eq!(index["levels"][1]["distanceThreshold"], 200);
}
