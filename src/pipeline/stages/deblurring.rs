//! Sharpening stage

use crate::pipeline::frame::FrameData;
use crate::pipeline::stage::{
    as_f32_in, as_u32_in, to_parameters, PipelineStage, StageContext, StageError, StageResult,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};

/// Deblurring configuration
#[derive(Debug, Clone, Serialize)]
pub struct DeblurringConfig {
    /// Gaussian sigma of the unsharp mask; 0 disables sharpening
    pub strength: f32,
    /// Minimum brightness difference that gets sharpened
    pub threshold: u32,
}

impl Default for DeblurringConfig {
    fn default() -> Self {
        Self {
            strength: 1.0,
            threshold: 0,
        }
    }
}

/// Unsharp-mask sharpening with tunable strength
#[derive(Debug, Default)]
pub struct DeblurringStage {
    config: DeblurringConfig,
}

impl DeblurringStage {
    pub fn new(config: DeblurringConfig) -> Self {
        Self { config }
    }
}

impl PipelineStage for DeblurringStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        _data: &mut FrameData,
        _ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        if self.config.strength <= 0.0 {
            return Ok(None);
        }
        Ok(Some(frame.unsharpen(
            self.config.strength,
            self.config.threshold as i32,
        )))
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "strength" => self.config.strength = as_f32_in(key, value, 0.0, 20.0)?,
            "threshold" => self.config.threshold = as_u32_in(key, value, 0, 255)?,
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }
}
