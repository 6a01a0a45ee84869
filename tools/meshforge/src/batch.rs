//! Batch run controller
//!
//! Walks the source tree, runs the pipeline over every recognized scene file,
//! writes outputs (and LOD sets), and aggregates run statistics. One bad
//! asset never aborts the batch: every failure is logged with its file and
//! cause, counted, and the run moves on.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::engine::TransformEngine;
use crate::lod;
use crate::output::{self, FormatSettings, OutputConfig};
use crate::pipeline::Pipeline;

/// Source file extensions recognized as scene documents.
const SCENE_EXTENSIONS: [&str; 2] = ["glb", "gltf"];

/// Options for one batch run, immutable while the run is in flight.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub pipeline: Pipeline,
    pub output: OutputConfig,
    pub formats: FormatSettings,
    pub generate_lod: bool,
    /// Explicit LOD levels; `None` derives them per document.
    pub lod_levels: Option<Vec<f32>>,
    /// Worker count; 1 processes files sequentially.
    pub jobs: usize,
    /// Empty the target directory before the run.
    pub clean: bool,
    /// Backface-culling post-step: force `double_sided` on every material.
    pub double_sided: Option<bool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pipeline: Pipeline::standard(),
            output: OutputConfig::default(),
            formats: FormatSettings::default(),
            generate_lod: false,
            lod_levels: None,
            jobs: 1,
            clean: false,
            double_sided: None,
        }
    }
}

/// Aggregated result of a batch run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub processed: u32,
    pub failed: u32,
    pub duration: Duration,
}

fn is_scene_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let ext = e.to_lowercase();
            SCENE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Recursively collect scene files under `source`, in stable order.
pub fn collect_scene_files(source: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        if entry.file_type().is_file() && is_scene_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Remove everything inside `dir` (which may not exist yet). Refuses to
/// proceed when the directory is not writable.
pub fn clear_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let metadata = dir
        .metadata()
        .with_context(|| format!("failed to stat {}", dir.display()))?;
    if metadata.permissions().readonly() {
        anyhow::bail!("target directory is not writable: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    tracing::info!("cleared target directory {}", dir.display());
    Ok(())
}

/// Process one file end to end: read, pipeline, outputs, LOD set.
fn process_file(
    path: &Path,
    source: &Path,
    target: &Path,
    options: &BatchOptions,
    engine: &dyn TransformEngine,
) -> Result<()> {
    let relative = path.strip_prefix(source).unwrap_or(path);

    let mut doc = scene_doc::read_document(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    options.pipeline.execute(&mut doc, engine)?;

    if let Some(double_sided) = options.double_sided {
        doc.set_all_double_sided(double_sided);
    }

    let outputs = output::resolve_outputs(path, target, relative, &options.output, &options.formats);
    let report = output::write_outputs(&doc, &outputs);

    if !report.is_complete() {
        let details: Vec<String> = report
            .failed
            .iter()
            .map(|(p, e)| format!("{}: {}", p.display(), e))
            .collect();
        anyhow::bail!(
            "{} of {} output formats failed ({} written): {}",
            report.failed.len(),
            outputs.len(),
            report.written.len(),
            details.join("; ")
        );
    }

    if options.generate_lod {
        let variants = lod::generate_lods(&doc, options.lod_levels.as_deref(), engine)?;
        let primary = &outputs[0].path;
        lod::write_lod_set(&variants, primary)?;
    }

    Ok(())
}

fn run_one(
    path: &Path,
    source: &Path,
    target: &Path,
    options: &BatchOptions,
    engine: &dyn TransformEngine,
) -> bool {
    tracing::info!("processing {}", path.display());
    match process_file(path, source, target, options, engine) {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("failed {}: {:#}", path.display(), err);
            false
        }
    }
}

/// Run the batch. Returns aggregate statistics; the caller decides the
/// process exit status from `failed`.
pub fn run_batch(
    source: &Path,
    target: &Path,
    options: &BatchOptions,
    engine: &dyn TransformEngine,
) -> Result<RunStats> {
    let start = Instant::now();

    anyhow::ensure!(
        source.is_dir(),
        "source directory not found: {}",
        source.display()
    );

    if options.clean {
        clear_directory(target)?;
    }

    let files = collect_scene_files(source)?;
    tracing::info!("found {} scene files under {}", files.len(), source.display());

    // Parallel variant: each file's document is owned by exactly one worker
    // task; stats are reduced from per-task outcomes afterwards.
    let outcomes: Vec<bool> = if options.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .context("failed to build worker pool")?;
        pool.install(|| {
            files
                .par_iter()
                .map(|path| run_one(path, source, target, options, engine))
                .collect()
        })
    } else {
        files
            .iter()
            .map(|path| run_one(path, source, target, options, engine))
            .collect()
    };

    let processed = outcomes.iter().filter(|&&ok| ok).count() as u32;
    let stats = RunStats {
        processed,
        failed: outcomes.len() as u32 - processed,
        duration: start.elapsed(),
    };

    tracing::info!(
        "batch complete: {} processed, {} failed in {:.2}s",
        stats.processed,
        stats.failed,
        stats.duration.as_secs_f64()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StandardEngine;
    use crate::error::StageError;
    use crate::output::OutputFormat;
    use crate::stages::StageDescriptor;
    use scene_doc::{Mesh, Node, Primitive, Scene, SceneDocument, WriteOptions};

    fn sample_document(mesh_name: &str) -> SceneDocument {
        let mut doc = SceneDocument::default();
        doc.meshes.push(Mesh {
            name: Some(mesh_name.to_string()),
            primitives: vec![Primitive {
                positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
                indices: vec![0, 1, 2],
                ..Default::default()
            }],
        });
        doc.nodes.push(Node {
            mesh: Some(0),
            ..Default::default()
        });
        doc.scenes.push(Scene {
            name: None,
            roots: vec![0],
        });
        doc
    }

    fn write_sample(path: &Path, mesh_name: &str) {
        scene_doc::write_document(path, &sample_document(mesh_name), &WriteOptions::default())
            .unwrap();
    }

    /// Engine that fails the pipeline for documents holding a poisoned mesh.
    struct PoisonEngine;

    impl TransformEngine for PoisonEngine {
        fn apply(
            &self,
            doc: &mut SceneDocument,
            _stage: &StageDescriptor,
        ) -> Result<(), StageError> {
            if doc.meshes.iter().any(|m| m.name.as_deref() == Some("boom")) {
                return Err(StageError::Failed("poisoned mesh".into()));
            }
            Ok(())
        }
    }

    fn options_with_pipeline(stages: Vec<StageDescriptor>) -> BatchOptions {
        BatchOptions {
            pipeline: Pipeline::new(stages).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_batch_processes_tree_and_preserves_layout() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("props")).unwrap();
        write_sample(&source.path().join("a.glb"), "a");
        write_sample(&source.path().join("props/b.glb"), "b");

        let options = options_with_pipeline(vec![]);
        let stats = run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 0);
        assert!(target.path().join("a.glb").exists());
        assert!(target.path().join("props/b.glb").exists());
    }

    #[test]
    fn test_stage_failure_is_isolated_per_file() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("1_first.glb"), "first");
        write_sample(&source.path().join("2_middle.glb"), "boom");
        write_sample(&source.path().join("3_last.glb"), "last");

        let options = options_with_pipeline(vec![StageDescriptor::Dequantize]);
        let stats = run_batch(source.path(), target.path(), &options, &PoisonEngine).unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        // File 3 was still attempted and written.
        assert!(target.path().join("3_last.glb").exists());
        assert!(!target.path().join("2_middle.glb").exists());
    }

    #[test]
    fn test_unreadable_file_is_isolated() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("good.glb"), "good");
        std::fs::write(source.path().join("bad.glb"), b"not a scene document").unwrap();

        let options = options_with_pipeline(vec![]);
        let stats = run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert!(target.path().join("good.glb").exists());
    }

    #[test]
    fn test_lod_set_written_next_to_primary() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("rock.glb"), "rock");

        let options = BatchOptions {
            generate_lod: true,
            lod_levels: Some(vec![1.0, 0.5]),
            ..options_with_pipeline(vec![])
        };
        let stats = run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert_eq!(stats.processed, 1);
        assert!(target.path().join("rock.glb").exists());
        assert!(target.path().join("rock_lod_1.glb").exists());
        assert!(target.path().join("rock_lod_0_5.glb").exists());
        assert!(target.path().join("rock_lod_config.json").exists());
    }

    #[test]
    fn test_parallel_batch_matches_sequential() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_sample(&source.path().join(format!("m{}.glb", i)), &format!("m{}", i));
        }

        let options = BatchOptions {
            jobs: 4,
            ..options_with_pipeline(vec![])
        };
        let stats = run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert_eq!(stats.processed, 6);
        for i in 0..6 {
            assert!(target.path().join(format!("m{}.glb", i)).exists());
        }
    }

    #[test]
    fn test_clean_empties_target_first() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("a.glb"), "a");
        std::fs::write(target.path().join("stale.txt"), b"old").unwrap();

        let options = BatchOptions {
            clean: true,
            ..options_with_pipeline(vec![])
        };
        run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert!(!target.path().join("stale.txt").exists());
        assert!(target.path().join("a.glb").exists());
    }

    #[test]
    fn test_overwrite_false_skips_existing_output() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("a.glb"), "a");
        std::fs::write(target.path().join("a.glb"), b"keep me").unwrap();

        let options = BatchOptions {
            output: OutputConfig {
                overwrite: false,
                ..Default::default()
            },
            ..options_with_pipeline(vec![])
        };
        let stats = run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(std::fs::read(target.path().join("a.glb")).unwrap(), b"keep me");
    }

    #[test]
    fn test_both_formats_written() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write_sample(&source.path().join("a.glb"), "a");

        let options = BatchOptions {
            output: OutputConfig {
                format: OutputFormat::Both,
                ..Default::default()
            },
            ..options_with_pipeline(vec![])
        };
        run_batch(
            source.path(),
            target.path(),
            &options,
            &StandardEngine::default(),
        )
        .unwrap();

        assert!(target.path().join("a.glb").exists());
        assert!(target.path().join("a.gltf").exists());
        assert!(target.path().join("a.bin").exists());
    }
}
