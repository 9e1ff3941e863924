//! Capture orchestrator
//!
//! Owns every capture source and the preview writer. Exposes start/stop of
//! all sources, readiness polling and point-in-time snapshots of the
//! buffer slots.

use super::audio::AudioCapture;
use super::buffer::FrameRecord;
use super::preview::PreviewWriter;
use super::queue::AudioQueue;
use super::traits::VideoSourceDescriptor;
use super::video::VideoCapture;
use crate::pipeline::ProcessingPipeline;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Latest record per video source id
pub type Snapshot = BTreeMap<String, Option<Arc<FrameRecord>>>;

/// Persistence view of one audio source
#[derive(Debug, Clone)]
pub struct AudioTap {
    pub id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub queue: Arc<AudioQueue>,
}

/// Preview settings
#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub dir: PathBuf,
    pub interval: Duration,
}

/// Source of frame snapshots for the persistence sampler
pub trait FrameSource: Send + Sync {
    /// Latest record of every video source
    fn snapshot(&self) -> Snapshot;

    /// Audio queues to drain
    fn audio_taps(&self) -> Vec<AudioTap>;
}

/// Owns and drives all capture sources
pub struct CaptureOrchestrator {
    video: Vec<VideoCapture>,
    audio: Vec<AudioCapture>,
    preview: PreviewWriter,
}

impl CaptureOrchestrator {
    /// Create an orchestrator. Sources are fixed from here on.
    pub fn new(video: Vec<VideoCapture>, audio: Vec<AudioCapture>, preview: PreviewSettings) -> Self {
        let slots = video
            .iter()
            .map(|capture| (capture.id().to_string(), capture.slot().clone()))
            .collect();
        let preview = PreviewWriter::new(preview.dir, preview.interval, slots);

        tracing::info!(
            "Capture orchestrator: {} video, {} audio sources",
            video.len(),
            audio.len()
        );

        Self {
            video,
            audio,
            preview,
        }
    }

    /// Start every source. Already running sources are left alone.
    pub fn start_all(&self) {
        for capture in &self.video {
            capture.start();
        }
        for capture in &self.audio {
            capture.start();
        }
    }

    /// Stop every source and the preview writer
    pub fn stop_all(&self) {
        self.preview.stop();
        for capture in &self.video {
            capture.stop();
        }
        for capture in &self.audio {
            capture.stop();
        }
        tracing::info!("All capture sources stopped");
    }

    /// Latest record per video source. Sources are read independently.
    pub fn snapshot(&self) -> Snapshot {
        self.video
            .iter()
            .map(|capture| (capture.id().to_string(), capture.slot().latest()))
            .collect()
    }

    /// True once every video source has published a frame
    pub fn all_ready(&self) -> bool {
        self.video.iter().all(|capture| capture.slot().is_ready())
    }

    /// Ids of video sources that have not produced a frame yet
    pub fn pending_sources(&self) -> Vec<String> {
        self.video
            .iter()
            .filter(|capture| !capture.slot().is_ready())
            .map(|capture| capture.id().to_string())
            .collect()
    }

    /// Video source ids in configuration order
    pub fn video_ids(&self) -> Vec<String> {
        self.video.iter().map(|capture| capture.id().to_string()).collect()
    }

    /// Pipeline of one video source
    pub fn pipeline(&self, source_id: &str) -> Option<&Arc<ProcessingPipeline>> {
        self.video
            .iter()
            .find(|capture| capture.id() == source_id)
            .map(|capture| capture.pipeline())
    }

    /// Pipeline of the first video source accepted by `matches`
    pub fn find_pipeline<F>(&self, matches: F) -> Option<&Arc<ProcessingPipeline>>
    where
        F: Fn(&VideoSourceDescriptor) -> bool,
    {
        self.video
            .iter()
            .find(|capture| matches(capture.descriptor()))
            .map(|capture| capture.pipeline())
    }

    /// Pipelines of all video sources in configuration order
    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<ProcessingPipeline>> {
        self.video.iter().map(|capture| capture.pipeline())
    }

    pub fn audio_taps(&self) -> Vec<AudioTap> {
        self.audio
            .iter()
            .map(|capture| AudioTap {
                id: capture.id().to_string(),
                sample_rate: capture.descriptor().sample_rate,
                channels: capture.descriptor().channels,
                queue: capture.queue().clone(),
            })
            .collect()
    }

    /// Let audio blocks into the queues
    pub fn arm_audio(&self) {
        for capture in &self.audio {
            capture.queue().arm();
        }
    }

    /// Discard audio blocks from now on
    pub fn disarm_audio(&self) {
        for capture in &self.audio {
            capture.queue().disarm();
        }
    }

    /// Flip the preview writer; returns whether it is now streaming
    pub fn toggle_preview(&self) -> bool {
        self.preview.toggle()
    }

    pub fn is_streaming(&self) -> bool {
        self.preview.is_streaming()
    }
}

impl FrameSource for CaptureOrchestrator {
    fn snapshot(&self) -> Snapshot {
        CaptureOrchestrator::snapshot(self)
    }

    fn audio_taps(&self) -> Vec<AudioTap> {
        CaptureOrchestrator::audio_taps(self)
    }
}
