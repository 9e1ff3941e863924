//! Object detector capability
//!
//! Detection models are heavy, so a single instance is created at startup
//! and shared by reference with every pipeline that needs it. Stages reach it
//! through the [`StageContext`](super::StageContext) handed to them per frame.

use super::frame::Detection;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;

/// Detector errors
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unsupported class: {0}")]
    UnsupportedClass(String),
}

/// Locates objects of the requested classes in a frame
pub trait Detector: Send + Sync {
    /// Human readable model name for logs and status
    fn name(&self) -> &str;

    /// Run detection restricted to `classes`, dropping results below
    /// `confidence`
    fn detect(
        &self,
        frame: &DynamicImage,
        classes: &[String],
        confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError>;
}

/// Shared handle to the process-wide detector
pub type SharedDetector = Arc<dyn Detector>;

/// Detector used when no model is configured. Never finds anything.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(
        &self,
        _frame: &DynamicImage,
        _classes: &[String],
        _confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Reports the same regions on every frame. Suits fixed cameras where the
/// board and lectern never move.
#[derive(Debug, Default, Clone)]
pub struct StaticDetector {
    detections: Vec<Detection>,
}

impl StaticDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for StaticDetector {
    fn name(&self) -> &str {
        "static"
    }

    fn detect(
        &self,
        frame: &DynamicImage,
        classes: &[String],
        confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        Ok(self
            .detections
            .iter()
            .filter(|d| classes.iter().any(|c| *c == d.class_name))
            .filter(|d| d.bbox.confidence >= confidence)
            .filter(|d| d.bbox.x1 < width && d.bbox.y1 < height)
            .cloned()
            .collect())
    }
}

/// Build the shared null detector
pub fn null_detector() -> SharedDetector {
    Arc::new(NullDetector)
}
