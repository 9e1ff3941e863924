//! Lecture Recorder - multi-source audio/video capture with remote control.
//!
//! Every video source runs its frames through a configurable processing
//! pipeline; a fixed-cadence persistence engine writes the latest frame of
//! every source plus all captured audio to disk, and a WebSocket control
//! channel starts, stops and tunes the whole system.

pub mod capture;
pub mod commands;
pub mod config;
pub mod control;
pub mod pipeline;
pub mod recorder;
pub mod storage;
pub mod utils;

use capture::{
    AudioCapture, AudioTransport, CaptureOrchestrator, CpalAudioTransport, FfmpegVideoOpener,
    VideoCapture, VideoOpener,
};
use config::{build_pipeline, SystemConfig};
use control::ControlChannel;
use recorder::RecordingCoordinator;
use std::sync::Arc;
use storage::{ArtifactFactory, FileArtifacts};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::AppResult;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lecture_recorder=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// The assembled system
pub struct LectureRecorder {
    pub orchestrator: Arc<CaptureOrchestrator>,
    pub coordinator: Arc<RecordingCoordinator>,
    pub channel: Arc<ControlChannel>,
    preview_at_boot: bool,
}

impl LectureRecorder {
    /// Assemble with the FFmpeg, cpal and file-system backends
    pub fn build(config: &SystemConfig) -> AppResult<Self> {
        Self::with_backends(
            config,
            Arc::new(FfmpegVideoOpener),
            Arc::new(CpalAudioTransport),
            Arc::new(FileArtifacts),
        )
    }

    /// Assemble with explicit transports and artifact writers
    pub fn with_backends(
        config: &SystemConfig,
        video_opener: Arc<dyn VideoOpener>,
        audio_transport: Arc<dyn AudioTransport>,
        artifacts: Arc<dyn ArtifactFactory>,
    ) -> AppResult<Self> {
        config.validate()?;

        let detector = config.detector();
        tracing::info!("Detector: {}", detector.name());

        let mut video = Vec::with_capacity(config.video_sources.len());
        for source in &config.video_sources {
            let pipeline = build_pipeline(source, detector.clone())?;
            video.push(VideoCapture::new(
                source.descriptor.clone(),
                video_opener.clone(),
                pipeline,
            ));
        }

        let audio = config
            .audio_sources
            .iter()
            .map(|source| {
                AudioCapture::new(
                    source.descriptor.clone(),
                    audio_transport.clone(),
                    source.queue_capacity,
                )
            })
            .collect();

        let orchestrator = Arc::new(CaptureOrchestrator::new(
            video,
            audio,
            config.preview.settings(),
        ));
        let coordinator = Arc::new(RecordingCoordinator::new(
            orchestrator.clone(),
            artifacts,
            config.recorder_settings(),
        ));

        let channel = ControlChannel::new(config.control.channel_config());
        commands::register_commands(&channel, coordinator.clone());

        Ok(Self {
            orchestrator,
            coordinator,
            channel,
            preview_at_boot: config.preview.enabled,
        })
    }

    /// Start every capture source and the control link
    pub fn start(&self) {
        self.orchestrator.start_all();
        if self.preview_at_boot && !self.orchestrator.is_streaming() {
            self.orchestrator.toggle_preview();
        }
        self.channel.start();
    }

    /// Close the control link, stop any session and every capture source
    pub async fn shutdown(&self) -> AppResult<()> {
        self.channel.stop().await;
        self.coordinator.shutdown().await?;
        Ok(())
    }
}
