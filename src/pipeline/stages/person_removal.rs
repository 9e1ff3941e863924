//! Person removal stage
//!
//! Blanks out detected people and paints the remaining pixels over a canvas
//! that persists across frames, so board content hidden behind a lecturer is
//! filled from earlier frames.

use crate::pipeline::frame::FrameData;
use crate::pipeline::stage::{
    as_u32_in, to_parameters, PipelineStage, StageContext, StageError, StageResult,
};
use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use serde_json::{Map, Value};

/// Person removal configuration
#[derive(Debug, Clone, Serialize)]
pub struct PersonRemovalConfig {
    /// Pixels erased around every person box
    pub padding: u32,
}

impl Default for PersonRemovalConfig {
    fn default() -> Self {
        Self { padding: 31 }
    }
}

/// Erases people and accumulates the visible background
#[derive(Debug, Default)]
pub struct PersonRemovalStage {
    config: PersonRemovalConfig,
    canvas: Option<RgbImage>,
}

impl PersonRemovalStage {
    pub fn new(config: PersonRemovalConfig) -> Self {
        Self {
            config,
            canvas: None,
        }
    }
}

impl PipelineStage for PersonRemovalStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        data: &mut FrameData,
        _ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        let mut visible = frame.to_rgb8();
        let (width, height) = visible.dimensions();

        // Boxes are in source coordinates; shift them into the cropped frame
        let (offset_x, offset_y) = match (data.cropped, data.crop_region) {
            (true, Some(region)) => (region.x1, region.y1),
            _ => (0.0, 0.0),
        };

        for person in &data.people_boxes {
            let mut shifted = *person;
            shifted.x1 -= offset_x;
            shifted.x2 -= offset_x;
            shifted.y1 -= offset_y;
            shifted.y2 -= offset_y;

            let (x, y, w, h) = shifted.padded_region(self.config.padding, width, height);
            for py in y..y + h {
                for px in x..x + w {
                    visible.put_pixel(px, py, Rgb([0, 0, 0]));
                }
            }
        }

        let mut canvas = match self.canvas.take() {
            Some(canvas) if canvas.dimensions() == (width, height) => canvas,
            Some(_) => {
                tracing::debug!("Frame size changed to {}x{}, resetting canvas", width, height);
                RgbImage::new(width, height)
            }
            None => RgbImage::new(width, height),
        };

        for (px, py, pixel) in visible.enumerate_pixels() {
            if pixel.0 != [0, 0, 0] {
                canvas.put_pixel(px, py, *pixel);
            }
        }

        let output = DynamicImage::ImageRgb8(canvas.clone());
        self.canvas = Some(canvas);
        Ok(Some(output))
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "padding" => self.config.padding = as_u32_in(key, value, 0, 512)?,
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }
}
