//! Object and person localization stages
//!
//! Both stages delegate inference to the shared detector in the stage context
//! and keep their last annotation so it can be replayed while disabled.

use crate::pipeline::frame::{BoundingBox, Detection, FrameData, BOARD_CLASS, PERSON_CLASS};
use crate::pipeline::stage::{
    as_f32_in, as_string_list, to_parameters, PipelineStage, StageContext, StageError, StageResult,
};
use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Object detection configuration
#[derive(Debug, Clone, Serialize)]
pub struct ObjectDetectionConfig {
    /// Classes passed to the detector
    pub classes: Vec<String>,
    /// Minimum confidence kept
    pub conf: f32,
}

impl Default for ObjectDetectionConfig {
    fn default() -> Self {
        Self {
            classes: vec![PERSON_CLASS.to_string(), BOARD_CLASS.to_string()],
            conf: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ObjectAnnotation {
    detections: BTreeMap<String, Vec<BoundingBox>>,
    people_boxes: Vec<BoundingBox>,
}

/// Locates every configured class and groups boxes by class name
#[derive(Debug, Default)]
pub struct ObjectDetectionStage {
    config: ObjectDetectionConfig,
    last: Option<ObjectAnnotation>,
}

impl ObjectDetectionStage {
    pub fn new(config: ObjectDetectionConfig) -> Self {
        Self { config, last: None }
    }
}

fn group_by_class(detections: Vec<Detection>) -> BTreeMap<String, Vec<BoundingBox>> {
    let mut grouped: BTreeMap<String, Vec<BoundingBox>> = BTreeMap::new();
    for detection in detections {
        grouped
            .entry(detection.class_name)
            .or_default()
            .push(detection.bbox);
    }
    grouped
}

impl PipelineStage for ObjectDetectionStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        data: &mut FrameData,
        ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        let found = ctx
            .detector
            .detect(frame, &self.config.classes, self.config.conf)?;

        let detections = group_by_class(found);
        let people_boxes = detections.get(PERSON_CLASS).cloned().unwrap_or_default();

        tracing::trace!(
            "[{}] Object detection found {} classes",
            ctx.source_id,
            detections.len()
        );

        self.last = Some(ObjectAnnotation {
            detections,
            people_boxes,
        });
        self.replay(data);
        Ok(None)
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "classes" => self.config.classes = as_string_list(key, value)?,
            "conf" => self.config.conf = as_f32_in(key, value, 0.0, 1.0)?,
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    fn replay(&self, data: &mut FrameData) {
        if let Some(last) = &self.last {
            for (class_name, boxes) in &last.detections {
                data.detections.insert(class_name.clone(), boxes.clone());
            }
            data.people_boxes = last.people_boxes.clone();
        }
    }
}

/// Person detection configuration
#[derive(Debug, Clone, Serialize)]
pub struct PersonDetectionConfig {
    /// Classes passed to the detector; anything other than persons and
    /// boards ends up in `combined_boxes`
    pub classes: Vec<String>,
    /// Minimum confidence kept
    pub threshold: f32,
}

impl Default for PersonDetectionConfig {
    fn default() -> Self {
        Self {
            classes: vec![PERSON_CLASS.to_string()],
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PersonAnnotation {
    people_boxes: Vec<BoundingBox>,
    combined_boxes: Vec<Detection>,
}

/// Splits detections into person boxes and other objects
#[derive(Debug, Default)]
pub struct PersonDetectionStage {
    config: PersonDetectionConfig,
    last: Option<PersonAnnotation>,
}

impl PersonDetectionStage {
    pub fn new(config: PersonDetectionConfig) -> Self {
        Self { config, last: None }
    }
}

impl PipelineStage for PersonDetectionStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        data: &mut FrameData,
        ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        let found = ctx
            .detector
            .detect(frame, &self.config.classes, self.config.threshold)?;

        let mut annotation = PersonAnnotation::default();
        for detection in found {
            if detection.class_name == PERSON_CLASS {
                annotation.people_boxes.push(detection.bbox);
            } else if detection.class_name != BOARD_CLASS {
                annotation.combined_boxes.push(detection);
            }
        }

        self.last = Some(annotation);
        self.replay(data);
        data.person_detection_finished = true;
        Ok(None)
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "classes" => self.config.classes = as_string_list(key, value)?,
            "threshold" => self.config.threshold = as_f32_in(key, value, 0.0, 1.0)?,
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    fn replay(&self, data: &mut FrameData) {
        if let Some(last) = &self.last {
            data.detections
                .insert(PERSON_CLASS.to_string(), last.people_boxes.clone());
            data.people_boxes = last.people_boxes.clone();
            data.combined_boxes = last.combined_boxes.clone();
        }
    }
}
