//! System configuration
//!
//! A single JSON file describes the control link, the storage location and
//! every capture source with its pipeline. Every field has a default so a
//! partial file is enough.

use crate::capture::{AudioSourceDescriptor, PreviewSettings, VideoSourceDescriptor, DEFAULT_QUEUE_CAPACITY};
use crate::control::ChannelConfig;
use crate::pipeline::{
    build_stage, null_detector, Detection, PipelineError, ProcessingPipeline, SharedDetector,
    StageError, StageKind, StaticDetector,
};
use crate::recorder::RecorderSettings;
use crate::storage::{is_plain_component, DEFAULT_FPS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Stage {stage} on source {source_id}: {source}")]
    Stage {
        source_id: String,
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub uri: String,
    pub token: String,
    pub retry_interval_secs: u64,
    pub auth_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            uri: "ws://127.0.0.1:3000".to_string(),
            token: String::new(),
            retry_interval_secs: 3,
            auth_timeout_secs: 10,
        }
    }
}

impl ControlConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            uri: self.uri.clone(),
            token: self.token.clone(),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub fps: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("recordings"),
            fps: DEFAULT_FPS,
        }
    }
}

/// Bounds of the START readiness wait
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub ready_poll_interval_ms: u64,
    pub ready_timeout_secs: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            ready_poll_interval_ms: 100,
            ready_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub dir: PathBuf,
    pub interval_ms: u64,
    /// Start streaming previews at boot
    pub enabled: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("preview"),
            interval_ms: 500,
            enabled: false,
        }
    }
}

impl PreviewConfig {
    pub fn settings(&self) -> PreviewSettings {
        PreviewSettings {
            dir: self.dir.clone(),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// Detector shared by every pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    Null,
    Static { detections: Vec<Detection> },
}

impl DetectorConfig {
    pub fn build(&self) -> SharedDetector {
        match self {
            DetectorConfig::Null => null_detector(),
            DetectorConfig::Static { detections } => Arc::new(StaticDetector::new(detections.clone())),
        }
    }
}

/// One stage of a video pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: StageKind,
    /// Registration name, the kind's default name when unset
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl StageConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.kind.default_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSourceConfig {
    #[serde(flatten)]
    pub descriptor: VideoSourceDescriptor,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSourceConfig {
    #[serde(flatten)]
    pub descriptor: AudioSourceDescriptor,
    /// Bound of the audio FIFO in blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub control: ControlConfig,
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub preview: PreviewConfig,
    pub detector: Option<DetectorConfig>,
    pub video_sources: Vec<VideoSourceConfig>,
    pub audio_sources: Vec<AudioSourceConfig>,
}

impl SystemConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::info!(
            "Loaded configuration from {:?}: {} video, {} audio sources",
            path,
            config.video_sources.len(),
            config.audio_sources.len()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.fps == 0 {
            return Err(ConfigError::Invalid("storage.fps must be positive".to_string()));
        }
        if self.control.retry_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "control.retry_interval_secs must be positive".to_string(),
            ));
        }
        if self.recording.ready_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "recording.ready_poll_interval_ms must be positive".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let video_ids = self.video_sources.iter().map(|s| &s.descriptor.id);
        let audio_ids = self.audio_sources.iter().map(|s| &s.descriptor.id);
        for id in video_ids.chain(audio_ids) {
            check_source_id(id)?;
            if !ids.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("Duplicate source id: {}", id)));
            }
        }

        for source in &self.video_sources {
            let mut names = HashSet::new();
            for stage in &source.stages {
                if !names.insert(stage.name()) {
                    return Err(ConfigError::Invalid(format!(
                        "Duplicate stage {} on source {}",
                        stage.name(),
                        source.descriptor.id
                    )));
                }
            }
        }

        for source in &self.audio_sources {
            let descriptor = &source.descriptor;
            if descriptor.sample_rate == 0 || descriptor.channels == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Audio source {} needs a sample rate and channel count",
                    descriptor.id
                )));
            }
            if source.queue_capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Audio source {} needs a non-zero queue capacity",
                    descriptor.id
                )));
            }
        }
        Ok(())
    }

    pub fn detector(&self) -> SharedDetector {
        self.detector
            .as_ref()
            .map(DetectorConfig::build)
            .unwrap_or_else(null_detector)
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            base_path: self.storage.base_path.clone(),
            fps: self.storage.fps,
            ready_poll_interval: Duration::from_millis(self.recording.ready_poll_interval_ms),
            ready_timeout: Duration::from_secs(self.recording.ready_timeout_secs),
        }
    }
}

/// Ids become directory names
fn check_source_id(id: &str) -> Result<(), ConfigError> {
    if is_plain_component(id) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("Invalid source id: {:?}", id)))
    }
}

/// Build the pipeline of one video source
pub fn build_pipeline(source: &VideoSourceConfig, detector: SharedDetector) -> Result<ProcessingPipeline, ConfigError> {
    let id = &source.descriptor.id;
    let mut pipeline = ProcessingPipeline::new(id.clone(), detector);

    for stage in &source.stages {
        let name = stage.name();
        let built = build_stage(stage.kind, &stage.params).map_err(|e| ConfigError::Stage {
            source_id: id.clone(),
            stage: name.to_string(),
            source: e,
        })?;
        pipeline.add_stage(name, built)?;
        if !stage.enabled {
            pipeline.set_enabled(name, false)?;
        }
    }

    tracing::info!("[{}] Pipeline: {:?}", id, pipeline.stage_names());
    Ok(pipeline)
}
