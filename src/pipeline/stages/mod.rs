//! Built-in pipeline stages
//!
//! Stages are selected by [`StageKind`] in the configuration file and built
//! through [`build_stage`], which applies the configured parameters through
//! the stage's validated `apply`.

mod binarization;
mod cropping;
mod deblurring;
mod detection;
mod person_removal;

pub use binarization::{BinarizationConfig, BinarizationStage};
pub use cropping::{CroppingConfig, CroppingStage};
pub use deblurring::{DeblurringConfig, DeblurringStage};
pub use detection::{
    ObjectDetectionConfig, ObjectDetectionStage, PersonDetectionConfig, PersonDetectionStage,
};
pub use person_removal::{PersonRemovalConfig, PersonRemovalStage};

use super::stage::{PipelineStage, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stage variants that can be named in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ObjectDetection,
    PersonDetection,
    Cropping,
    Deblurring,
    Binarization,
    PersonRemoval,
}

impl StageKind {
    /// Name a stage registers under when the configuration gives none
    pub fn default_name(&self) -> &'static str {
        match self {
            StageKind::ObjectDetection => "ObjectDetectionStage",
            StageKind::PersonDetection => "PersonDetectionStage",
            StageKind::Cropping => "ImageCroppingStage",
            StageKind::Deblurring => "DeblurringStage",
            StageKind::Binarization => "ImageBinarizationStage",
            StageKind::PersonRemoval => "PersonRemovingStage",
        }
    }
}

/// Construct a stage of `kind` and apply `params` on top of its defaults
pub fn build_stage(kind: StageKind, params: &Map<String, Value>) -> StageResult<Box<dyn PipelineStage>> {
    let mut stage: Box<dyn PipelineStage> = match kind {
        StageKind::ObjectDetection => Box::new(ObjectDetectionStage::default()),
        StageKind::PersonDetection => Box::new(PersonDetectionStage::default()),
        StageKind::Cropping => Box::new(CroppingStage::default()),
        StageKind::Deblurring => Box::new(DeblurringStage::default()),
        StageKind::Binarization => Box::new(BinarizationStage::default()),
        StageKind::PersonRemoval => Box::new(PersonRemovalStage::default()),
    };
    stage.set_parameters(params)?;
    Ok(stage)
}
