//! Per-frame metadata model
//!
//! Every captured frame gets a fresh [`FrameData`] that the enabled stages
//! annotate in registration order. The record is serialized to JSON for the
//! metadata log written alongside each video.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Class name used for person detections
pub const PERSON_CLASS: &str = "person";

/// Class name used for writing-surface detections
pub const BOARD_CLASS: &str = "blackboard";

/// Axis-aligned bounding box in pixel coordinates (x1, y1) - (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Grow the box by `padding` pixels on every side and clamp it to a
    /// `width` x `height` frame. Returns integer (x, y, w, h).
    pub fn padded_region(&self, padding: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let pad = padding as f32;
        let x1 = (self.x1 - pad).max(0.0).min(width as f32) as u32;
        let y1 = (self.y1 - pad).max(0.0).min(height as f32) as u32;
        let x2 = (self.x2 + pad).max(0.0).min(width as f32) as u32;
        let y2 = (self.y2 + pad).max(0.0).min(height as f32) as u32;
        (x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// A labelled detection returned by a [`Detector`](super::Detector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub bbox: BoundingBox,
}

/// Stage-produced metadata for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    /// Capture timestamp (unix seconds)
    pub timestamp: f64,

    /// Bounding boxes keyed by class name
    #[serde(default)]
    pub detections: BTreeMap<String, Vec<BoundingBox>>,

    /// Person boxes from the person detection stage
    #[serde(default)]
    pub people_boxes: Vec<BoundingBox>,

    /// Detections that are neither persons nor boards
    #[serde(default)]
    pub combined_boxes: Vec<Detection>,

    /// Region the cropping stage cut the frame to
    #[serde(default)]
    pub crop_region: Option<BoundingBox>,

    /// Whether the cropping stage modified this frame
    #[serde(default)]
    pub cropped: bool,

    /// Set once person detection ran on this frame
    #[serde(default)]
    pub person_detection_finished: bool,
}

impl FrameData {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Boxes recorded for `class_name`, empty when none
    pub fn boxes(&self, class_name: &str) -> &[BoundingBox] {
        self.detections
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Largest box of `class_name`, if any
    pub fn largest(&self, class_name: &str) -> Option<BoundingBox> {
        self.boxes(class_name)
            .iter()
            .copied()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
    }

    /// Serialize the record for the metadata log
    pub fn serialized(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
