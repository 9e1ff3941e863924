//! Region cropping stage

use crate::pipeline::frame::{BoundingBox, FrameData, BOARD_CLASS};
use crate::pipeline::stage::{
    as_string, as_u32_in, to_parameters, PipelineStage, StageContext, StageError, StageResult,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};

/// Cropping configuration
#[derive(Debug, Clone, Serialize)]
pub struct CroppingConfig {
    /// Class whose largest box is cropped to
    pub target_class: String,
    /// Extra pixels kept around the box
    pub padding: u32,
}

impl Default for CroppingConfig {
    fn default() -> Self {
        Self {
            target_class: BOARD_CLASS.to_string(),
            padding: 0,
        }
    }
}

/// Crops the frame around the largest detected region of the target class
#[derive(Debug, Default)]
pub struct CroppingStage {
    config: CroppingConfig,
}

impl CroppingStage {
    pub fn new(config: CroppingConfig) -> Self {
        Self { config }
    }
}

impl PipelineStage for CroppingStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        data: &mut FrameData,
        _ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        let Some(region) = data.largest(&self.config.target_class) else {
            data.cropped = false;
            return Ok(None);
        };

        let (x, y, w, h) = region.padded_region(self.config.padding, frame.width(), frame.height());
        if w == 0 || h == 0 {
            data.cropped = false;
            return Ok(None);
        }

        data.crop_region = Some(
            BoundingBox::new(x as f32, y as f32, (x + w) as f32, (y + h) as f32)
                .with_confidence(region.confidence),
        );
        data.cropped = true;
        Ok(Some(frame.crop_imm(x, y, w, h)))
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "target_class" => self.config.target_class = as_string(key, value)?,
            "padding" => self.config.padding = as_u32_in(key, value, 0, 4096)?,
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }
}
