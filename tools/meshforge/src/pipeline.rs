//! Pipeline orchestrator
//!
//! Applies configured stages to one document in order, one pass. The first
//! failing stage aborts the remainder and the error names the stage and its
//! parameters. Stage parameters are validated up front so configuration
//! problems never surface mid-pipeline.

use std::sync::atomic::{AtomicBool, Ordering};

use scene_doc::SceneDocument;

use crate::engine::TransformEngine;
use crate::error::{ConfigError, PipelineError};
use crate::stages::StageDescriptor;

/// An ordered, validated stage sequence.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageDescriptor>,
}

impl Pipeline {
    /// Build a pipeline, validating every stage's parameters first.
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, ConfigError> {
        for stage in &stages {
            stage.validate()?;
        }
        Ok(Self { stages })
    }

    /// The default production pipeline.
    pub fn standard() -> Self {
        Self {
            stages: crate::stages::default_pipeline(),
        }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage against the document, mutating it in place.
    pub fn execute(
        &self,
        doc: &mut SceneDocument,
        engine: &dyn TransformEngine,
    ) -> Result<(), PipelineError> {
        self.execute_with_cancel(doc, engine, None)
    }

    /// As `execute`, checking the cancel flag between stages only - a running
    /// transform is never interrupted.
    pub fn execute_with_cancel(
        &self,
        doc: &mut SceneDocument,
        engine: &dyn TransformEngine,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), PipelineError> {
        for (index, stage) in self.stages.iter().enumerate() {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(PipelineError::Cancelled {
                        completed: index,
                        total: self.stages.len(),
                    });
                }
            }

            tracing::debug!("applying stage {}/{}: {}", index + 1, self.stages.len(), stage.kind());
            engine
                .apply(doc, stage)
                .map_err(|source| PipelineError::Stage {
                    stage: stage.kind().name(),
                    params: stage.params_summary(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::stages::{ReorderLevel, StageKind};
    use std::sync::Mutex;

    /// Test engine that records the applied stage sequence and can be told to
    /// fail on a specific stage kind.
    struct RecordingEngine {
        applied: Mutex<Vec<StageDescriptor>>,
        fail_on: Option<StageKind>,
    }

    impl RecordingEngine {
        fn new() -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(kind: StageKind) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_on: Some(kind),
            }
        }
    }

    impl TransformEngine for RecordingEngine {
        fn apply(
            &self,
            _doc: &mut SceneDocument,
            stage: &StageDescriptor,
        ) -> Result<(), StageError> {
            if self.fail_on == Some(stage.kind()) {
                return Err(StageError::Failed("injected failure".into()));
            }
            self.applied.lock().unwrap().push(stage.clone());
            Ok(())
        }
    }

    fn weld(tolerance: f32) -> StageDescriptor {
        StageDescriptor::Weld {
            tolerance,
            tolerance_normal: 0.25,
        }
    }

    #[test]
    fn test_stages_run_in_configured_order() {
        let stages = vec![
            StageDescriptor::Prune,
            StageDescriptor::Reorder {
                level: ReorderLevel::Low,
            },
            StageDescriptor::Flatten,
        ];
        let pipeline = Pipeline::new(stages.clone()).unwrap();
        let engine = RecordingEngine::new();

        pipeline.execute(&mut SceneDocument::default(), &engine).unwrap();

        assert_eq!(*engine.applied.lock().unwrap(), stages);
    }

    #[test]
    fn test_repeated_weld_stages_are_independent_steps() {
        let stages = vec![weld(0.001), weld(1e-5), weld(1e-6)];
        let pipeline = Pipeline::new(stages.clone()).unwrap();
        let engine = RecordingEngine::new();

        pipeline.execute(&mut SceneDocument::default(), &engine).unwrap();

        // All three occurrences applied, in order, no deduplication.
        assert_eq!(*engine.applied.lock().unwrap(), stages);
    }

    #[test]
    fn test_first_failure_aborts_remaining_stages() {
        let pipeline = Pipeline::new(vec![
            StageDescriptor::Prune,
            StageDescriptor::Flatten,
            StageDescriptor::Dequantize,
        ])
        .unwrap();
        let engine = RecordingEngine::failing_on(StageKind::Flatten);

        let err = pipeline
            .execute(&mut SceneDocument::default(), &engine)
            .unwrap_err();

        match err {
            PipelineError::Stage { stage, .. } => assert_eq!(stage, "flatten"),
            other => panic!("unexpected error: {other}"),
        }
        // Only the stage before the failure ran.
        assert_eq!(
            *engine.applied.lock().unwrap(),
            vec![StageDescriptor::Prune]
        );
    }

    #[test]
    fn test_invalid_params_rejected_before_any_stage_runs() {
        let result = Pipeline::new(vec![
            StageDescriptor::Prune,
            StageDescriptor::Simplify {
                ratio: 0.0,
                error: 0.001,
                min_points: 100,
                lock_border: false,
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_checked_between_stages() {
        let pipeline = Pipeline::new(vec![StageDescriptor::Prune, StageDescriptor::Flatten]).unwrap();
        let engine = RecordingEngine::new();
        let cancel = AtomicBool::new(true);

        let err = pipeline
            .execute_with_cancel(&mut SceneDocument::default(), &engine, Some(&cancel))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled { completed: 0, .. }));
        assert!(engine.applied.lock().unwrap().is_empty());
    }
}
