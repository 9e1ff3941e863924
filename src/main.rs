//! Lecture Recorder
//!
//! Usage: `lecture-recorder [config.json]`

use anyhow::{Context, Result};
use lecture_recorder::capture::input_device_names;
use lecture_recorder::config::SystemConfig;
use lecture_recorder::recorder::RecordingEvent;
use lecture_recorder::{init_tracing, LectureRecorder};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    tracing::info!("Starting Lecture Recorder v{}", env!("CARGO_PKG_VERSION"));

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = if path.exists() {
        SystemConfig::load(&path).with_context(|| format!("Failed to load {:?}", path))?
    } else {
        tracing::warn!("No configuration at {:?}, using defaults", path);
        SystemConfig::default()
    };

    if !config.audio_sources.is_empty() {
        for name in input_device_names() {
            tracing::info!("Audio input device: {}", name);
        }
    }

    let recorder = LectureRecorder::build(&config).context("Failed to assemble the recorder")?;

    let mut events = recorder.coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecordingEvent::Started(name) => tracing::info!("Session {} started", name),
                RecordingEvent::Stopped(summary) => tracing::info!(
                    "Session {} saved ({}s, frames {:?})",
                    summary.name,
                    summary.duration,
                    summary.frames
                ),
                RecordingEvent::Error(message) => tracing::warn!("Session error: {}", message),
            }
        }
    });

    recorder.start();
    tracing::info!("Recorder running, press Ctrl+C to exit");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    recorder.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
