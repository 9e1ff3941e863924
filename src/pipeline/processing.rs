//! Processing pipeline
//!
//! An ordered chain of named stages run on every captured frame. Each stage
//! carries its own enable flag and its own lock, so the control side can
//! toggle or retune one stage while frames flow through the others.

use super::detector::SharedDetector;
use super::frame::FrameData;
use super::stage::{PipelineStage, StageContext, StageError};
use image::DynamicImage;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage already registered: {0}")]
    DuplicateStage(String),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage '{stage}' rejected parameter: {source}")]
    Parameter {
        stage: String,
        #[source]
        source: StageError,
    },
}

/// Snapshot of one stage for status reports
#[derive(Debug, Clone, Serialize)]
pub struct StageInfo {
    pub name: String,
    pub enabled: bool,
    pub params: Map<String, Value>,
}

struct StageSlot {
    name: String,
    enabled: AtomicBool,
    stage: Mutex<Box<dyn PipelineStage>>,
}

/// Ordered, per-source chain of stages
pub struct ProcessingPipeline {
    context: StageContext,
    stages: Vec<StageSlot>,
}

impl ProcessingPipeline {
    /// Create an empty pipeline for `source_id` sharing `detector`
    pub fn new(source_id: impl Into<String>, detector: SharedDetector) -> Self {
        Self {
            context: StageContext {
                source_id: source_id.into(),
                detector,
            },
            stages: Vec::new(),
        }
    }

    /// Source this pipeline belongs to
    pub fn source_id(&self) -> &str {
        &self.context.source_id
    }

    /// Append a stage. Names must be unique; new stages start enabled.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        stage: Box<dyn PipelineStage>,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if self.slot(&name).is_some() {
            return Err(PipelineError::DuplicateStage(name));
        }

        tracing::debug!("[{}] Added stage {}", self.context.source_id, name);
        self.stages.push(StageSlot {
            name,
            enabled: AtomicBool::new(true),
            stage: Mutex::new(stage),
        });
        Ok(())
    }

    fn slot(&self, name: &str) -> Option<&StageSlot> {
        self.stages.iter().find(|slot| slot.name == name)
    }

    fn slot_or_err(&self, name: &str) -> Result<&StageSlot, PipelineError> {
        self.slot(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    /// Stage names in registration order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|slot| slot.name.clone()).collect()
    }

    /// Enable or disable a stage. Takes effect from the next frame.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PipelineError> {
        let slot = self.slot_or_err(name)?;
        slot.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(
            "[{}] Stage '{}' enabled: {}",
            self.context.source_id,
            name,
            enabled
        );
        Ok(())
    }

    /// Whether a stage is enabled; `None` for unknown names
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.slot(name).map(|slot| slot.enabled.load(Ordering::SeqCst))
    }

    /// Forward a single parameter to a stage
    pub fn set_parameter(&self, name: &str, key: &str, value: &Value) -> Result<(), PipelineError> {
        let slot = self.slot_or_err(name)?;
        let mut stage = slot.stage.lock();
        stage
            .apply(key, value)
            .map_err(|source| PipelineError::Parameter {
                stage: name.to_string(),
                source,
            })?;
        tracing::info!(
            "[{}] Set '{}' = {} on stage '{}'",
            self.context.source_id,
            key,
            value,
            name
        );
        Ok(())
    }

    /// Forward a parameter map to a stage
    pub fn set_parameters(&self, name: &str, params: &Map<String, Value>) -> Result<(), PipelineError> {
        let slot = self.slot_or_err(name)?;
        let mut stage = slot.stage.lock();
        stage
            .set_parameters(params)
            .map_err(|source| PipelineError::Parameter {
                stage: name.to_string(),
                source,
            })
    }

    /// Current parameters of a stage
    pub fn parameters(&self, name: &str) -> Option<Map<String, Value>> {
        self.slot(name).map(|slot| slot.stage.lock().parameters())
    }

    /// Status snapshot of every stage
    pub fn stage_infos(&self) -> Vec<StageInfo> {
        self.stages
            .iter()
            .map(|slot| StageInfo {
                name: slot.name.clone(),
                enabled: slot.enabled.load(Ordering::SeqCst),
                params: slot.stage.lock().parameters(),
            })
            .collect()
    }

    /// Run `frame` through every enabled stage in order.
    ///
    /// A failing or panicking stage leaves frame and metadata as they were
    /// before it ran; the remaining stages still execute.
    pub fn process(&self, frame: DynamicImage, timestamp: f64) -> (DynamicImage, FrameData) {
        let mut frame = frame;
        let mut data = FrameData::new(timestamp);

        for slot in &self.stages {
            let mut stage = slot.stage.lock();

            if !slot.enabled.load(Ordering::SeqCst) {
                stage.replay(&mut data);
                continue;
            }

            let before = data.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                stage.process(&frame, &mut data, &self.context)
            }));

            match outcome {
                Ok(Ok(Some(output))) => frame = output,
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        "[{}] Stage '{}' failed, passing frame through: {}",
                        self.context.source_id,
                        slot.name,
                        e
                    );
                    data = before;
                }
                Err(_) => {
                    tracing::warn!(
                        "[{}] Stage '{}' panicked, passing frame through",
                        self.context.source_id,
                        slot.name
                    );
                    data = before;
                }
            }
        }

        (frame, data)
    }
}
