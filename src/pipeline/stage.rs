//! Pipeline stage capability
//!
//! A stage transforms a frame and annotates its metadata. Stages own a typed
//! configuration struct; remote parameter changes go through [`PipelineStage::apply`],
//! which validates each key and value before touching the configuration.

use super::detector::SharedDetector;
use super::frame::FrameData;
use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Stage errors
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Detection failed: {0}")]
    Detection(#[from] super::detector::DetectorError),

    #[error("Processing failed: {0}")]
    Processing(String),
}

/// Result type for stage operations
pub type StageResult<T> = Result<T, StageError>;

/// Shared collaborators handed to every stage invocation
#[derive(Clone)]
pub struct StageContext {
    /// Video source the frame came from
    pub source_id: String,

    /// Process-wide detector
    pub detector: SharedDetector,
}

/// Capability implemented by every pipeline stage
pub trait PipelineStage: Send {
    /// Transform `frame` and annotate `data`.
    ///
    /// Returns `Some(frame)` when the stage produced a new image and `None`
    /// when the input frame passes through unchanged.
    fn process(
        &mut self,
        frame: &DynamicImage,
        data: &mut FrameData,
        ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>>;

    /// Current configuration as a JSON map
    fn parameters(&self) -> Map<String, Value>;

    /// Validate and apply a single parameter
    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()>;

    /// Apply every entry of `params`, stopping at the first invalid one
    fn set_parameters(&mut self, params: &Map<String, Value>) -> StageResult<()> {
        for (key, value) in params {
            self.apply(key, value)?;
        }
        Ok(())
    }

    /// Re-emit the last annotation while the stage is disabled
    fn replay(&self, _data: &mut FrameData) {}
}

/// Serialize a typed stage config into a parameter map
pub fn to_parameters<T: Serialize>(config: &T) -> Map<String, Value> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => Map::new(),
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> StageError {
    StageError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Read a finite float
pub fn as_f32(key: &str, value: &Value) -> StageResult<f32> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v as f32)
        .ok_or_else(|| invalid(key, format!("expected a number, got {value}")))
}

/// Read a float constrained to `min..=max`
pub fn as_f32_in(key: &str, value: &Value, min: f32, max: f32) -> StageResult<f32> {
    let v = as_f32(key, value)?;
    if v < min || v > max {
        return Err(invalid(key, format!("{v} outside {min}..={max}")));
    }
    Ok(v)
}

/// Read a non-negative integer constrained to `min..=max`
pub fn as_u32_in(key: &str, value: &Value, min: u32, max: u32) -> StageResult<u32> {
    let v = value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        })
        .ok_or_else(|| invalid(key, format!("expected a non-negative integer, got {value}")))?;
    if v < min as u64 || v > max as u64 {
        return Err(invalid(key, format!("{v} outside {min}..={max}")));
    }
    Ok(v as u32)
}

/// Read an odd integer window size constrained to `min..=max`
pub fn as_odd_u32_in(key: &str, value: &Value, min: u32, max: u32) -> StageResult<u32> {
    let v = as_u32_in(key, value, min, max)?;
    if v % 2 == 0 {
        return Err(invalid(key, format!("{v} must be odd")));
    }
    Ok(v)
}

/// Read a list of class names
pub fn as_string_list(key: &str, value: &Value) -> StageResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(key, "expected a list of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(key, format!("expected a string, got {item}")))
        })
        .collect()
}

/// Read a string
pub fn as_string(key: &str, value: &Value) -> StageResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, format!("expected a string, got {value}")))
}
