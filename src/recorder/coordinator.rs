//! Recording coordinator
//!
//! Binds the capture orchestrator, the per-source pipelines and the
//! persistence engine behind the operations the control commands need,
//! and builds the status snapshot reported back to the controller.

use super::state::{session_name, RecordingSession, RecordingState, RecordingSummary};
use crate::capture::{CaptureOrchestrator, FrameSource};
use crate::control::{CurrentInfo, SourceRef, StageReport, StageStatus};
use crate::pipeline::{PipelineError, ProcessingPipeline};
use crate::storage::{is_plain_component, ArtifactFactory, PersistenceEngine, PersistenceError};
use crate::utils::round_centis;
use parking_lot::{Mutex as ParkingMutex, RwLock};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Sources not ready: {}", .0.join(", "))]
    NotReady(Vec<String>),

    #[error("Invalid session name: {0:?}")]
    InvalidName(String),

    #[error("Start cancelled")]
    Cancelled,

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Session started
    Started(String),
    /// Session stopped and flushed
    Stopped(RecordingSummary),
    /// A start request gave up
    Error(String),
}

/// Recording settings
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub base_path: PathBuf,
    pub fps: u32,
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
}

/// Coordinates capture, pipelines and persistence
pub struct RecordingCoordinator {
    orchestrator: Arc<CaptureOrchestrator>,
    factory: Arc<dyn ArtifactFactory>,
    settings: RecorderSettings,

    /// Current recording state
    state: RwLock<RecordingState>,

    /// Set by stop/shutdown while a start waits for the sources
    cancel_start: AtomicBool,

    session: ParkingMutex<Option<RecordingSession>>,
    engine: ParkingMutex<Option<Arc<PersistenceEngine>>>,

    /// Length of the last finished session, seconds
    last_duration: ParkingMutex<f64>,

    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingCoordinator {
    pub fn new(
        orchestrator: Arc<CaptureOrchestrator>,
        factory: Arc<dyn ArtifactFactory>,
        settings: RecorderSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            orchestrator,
            factory,
            settings,
            state: RwLock::new(RecordingState::Idle),
            cancel_start: AtomicBool::new(false),
            session: ParkingMutex::new(None),
            engine: ParkingMutex::new(None),
            last_duration: ParkingMutex::new(0.0),
            event_tx,
        }
    }

    pub fn orchestrator(&self) -> &Arc<CaptureOrchestrator> {
        &self.orchestrator
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Start a session once every video source has a frame.
    ///
    /// Returns `Ok(false)` when a session is already active or starting.
    /// The readiness wait is bounded by the configured timeout and ends
    /// early when [`stop_recording`](Self::stop_recording) or
    /// [`shutdown`](Self::shutdown) is called.
    pub async fn start_recording(&self, name: Option<String>) -> RecordingResult<bool> {
        match self.begin_start(name)? {
            Some(name) => self.finish_start(name).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Claim the idle → starting transition and resolve the session name.
    ///
    /// Returns `None` when a session is already active or starting. A name
    /// must be a single directory name below the base path.
    pub fn begin_start(&self, name: Option<String>) -> RecordingResult<Option<String>> {
        if let Some(name) = &name {
            if !is_plain_component(name) {
                return Err(RecordingError::InvalidName(name.clone()));
            }
        }

        let mut state = self.state.write();
        if *state != RecordingState::Idle {
            tracing::warn!("Recording is already in progress ({:?})", *state);
            return Ok(None);
        }
        *state = RecordingState::Starting;
        self.cancel_start.store(false, Ordering::SeqCst);
        Ok(Some(name.unwrap_or_else(session_name)))
    }

    /// Wait for the sources and launch the engine of a start claimed by
    /// [`begin_start`](Self::begin_start)
    pub async fn finish_start(&self, name: String) -> RecordingResult<()> {
        if self.state() != RecordingState::Starting {
            return Err(RecordingError::Cancelled);
        }

        let deadline = Instant::now() + self.settings.ready_timeout;
        while !self.orchestrator.all_ready() {
            if self.cancel_start.load(Ordering::SeqCst) {
                return Err(self.abort_start(RecordingError::Cancelled));
            }
            if Instant::now() >= deadline {
                let pending = self.orchestrator.pending_sources();
                return Err(self.abort_start(RecordingError::NotReady(pending)));
            }
            tokio::time::sleep(self.settings.ready_poll_interval).await;
        }

        let mut state = self.state.write();
        if self.cancel_start.load(Ordering::SeqCst) {
            drop(state);
            return Err(self.abort_start(RecordingError::Cancelled));
        }

        let source: Arc<dyn FrameSource> = self.orchestrator.clone();
        let engine = Arc::new(PersistenceEngine::new(
            name.clone(),
            &self.settings.base_path,
            self.settings.fps,
            source,
            self.factory.clone(),
        ));

        self.orchestrator.arm_audio();
        if let Err(e) = engine.start() {
            self.orchestrator.disarm_audio();
            drop(state);
            return Err(self.abort_start(e.into()));
        }

        *self.engine.lock() = Some(engine);
        *self.session.lock() = Some(RecordingSession::new(name.clone()));
        *state = RecordingState::Recording;
        drop(state);

        let _ = self.event_tx.send(RecordingEvent::Started(name.clone()));
        tracing::info!("Recording started: {}", name);
        Ok(())
    }

    fn abort_start(&self, error: RecordingError) -> RecordingError {
        *self.state.write() = RecordingState::Idle;
        tracing::warn!("Recording not started: {}", error);
        let _ = self.event_tx.send(RecordingEvent::Error(error.to_string()));
        error
    }

    /// Stop the active session and flush its artifacts.
    ///
    /// Stopping while idle is a logged no-op; stopping while a start is
    /// waiting for the sources cancels that start.
    pub async fn stop_recording(&self) -> RecordingResult<Option<RecordingSummary>> {
        {
            let mut state = self.state.write();
            match *state {
                RecordingState::Idle | RecordingState::Stopping => {
                    tracing::warn!("Recording is not currently in progress");
                    return Ok(None);
                }
                RecordingState::Starting => {
                    self.cancel_start.store(true, Ordering::SeqCst);
                    tracing::info!("Cancelling pending start");
                    return Ok(None);
                }
                RecordingState::Recording => *state = RecordingState::Stopping,
            }
        }

        self.orchestrator.disarm_audio();
        let engine = self.engine.lock().take();
        let stats = match engine {
            Some(engine) => tokio::task::spawn_blocking(move || engine.stop())
                .await
                .map_err(|e| RecordingError::Task(e.to_string()))?,
            None => None,
        };

        let mut session = self.session.lock().take();
        let duration = round_centis(session.as_mut().map(|s| s.end()).unwrap_or(0.0));
        *self.last_duration.lock() = duration;

        let summary = RecordingSummary {
            name: session.map(|s| s.name).unwrap_or_default(),
            duration,
            frames: stats.map(|stats| stats.frames).unwrap_or_default(),
        };
        *self.state.write() = RecordingState::Idle;

        let _ = self.event_tx.send(RecordingEvent::Stopped(summary.clone()));
        tracing::info!(
            "Recording stopped: {} ({}s)",
            summary.name,
            summary.duration
        );
        Ok(Some(summary))
    }

    /// Stop any active session, then every capture source
    pub async fn shutdown(&self) -> RecordingResult<()> {
        tracing::info!("Shutting down the system");
        if self.state() == RecordingState::Starting {
            self.cancel_start.store(true, Ordering::SeqCst);
        }
        if self.is_recording() {
            self.stop_recording().await?;
        }

        let orchestrator = self.orchestrator.clone();
        tokio::task::spawn_blocking(move || orchestrator.stop_all())
            .await
            .map_err(|e| RecordingError::Task(e.to_string()))
    }

    fn pipeline(&self, source: &SourceRef) -> RecordingResult<&Arc<ProcessingPipeline>> {
        self.orchestrator
            .find_pipeline(|descriptor| source.matches(&descriptor.id, &descriptor.source))
            .ok_or_else(|| RecordingError::UnknownSource(source.to_string()))
    }

    /// Enable or disable a stage on one source
    pub fn set_stage_enabled(&self, source: &SourceRef, stage: &str, enabled: bool) -> RecordingResult<()> {
        self.pipeline(source)?.set_enabled(stage, enabled)?;
        Ok(())
    }

    /// Apply one stage parameter on one source
    pub fn set_parameter(&self, source: &SourceRef, stage: &str, key: &str, value: &Value) -> RecordingResult<()> {
        self.pipeline(source)?.set_parameter(stage, key, value)?;
        Ok(())
    }

    /// Flip the preview writer; returns whether it is now streaming
    pub fn toggle_preview(&self) -> bool {
        let streaming = self.orchestrator.toggle_preview();
        tracing::info!("Preview streaming: {}", streaming);
        streaming
    }

    /// Status snapshot
    pub fn current_info(&self) -> CurrentInfo {
        let recording = self.is_recording();
        let time = if recording {
            self.session
                .lock()
                .as_ref()
                .map(|session| round_centis(session.elapsed_secs()))
                .unwrap_or(0.0)
        } else {
            *self.last_duration.lock()
        };

        let stages = self
            .orchestrator
            .pipelines()
            .flat_map(|pipeline| {
                let key = pipeline.source_id().to_string();
                pipeline
                    .stage_infos()
                    .into_iter()
                    .map(move |info| StageReport {
                        name: info.name,
                        status: StageStatus {
                            key: key.clone(),
                            status: info.enabled,
                        },
                        params: info.params,
                    })
            })
            .collect();

        CurrentInfo {
            recording,
            time,
            stages,
            is_streaming: self.orchestrator.is_streaming(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::video::tests::{descriptor, ScriptedOpener};
    use crate::capture::{PreviewSettings, VideoCapture};
    use crate::pipeline::{build_stage, null_detector, StageKind};
    use crate::storage::engine::tests::MemoryArtifacts;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn video(id: &str, interval: Duration) -> VideoCapture {
        let mut pipeline = ProcessingPipeline::new(id, null_detector());
        pipeline
            .add_stage(
                StageKind::Deblurring.default_name(),
                build_stage(StageKind::Deblurring, &Default::default()).unwrap(),
            )
            .unwrap();
        VideoCapture::new(descriptor(id), Arc::new(ScriptedOpener::endless(interval)), pipeline)
    }

    fn coordinator(video: Vec<VideoCapture>, ready_timeout: Duration) -> (RecordingCoordinator, MemoryArtifacts, TempDir) {
        let dir = tempdir().unwrap();
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            video,
            vec![],
            PreviewSettings {
                dir: dir.path().join("preview"),
                interval: Duration::from_millis(50),
            },
        ));
        let factory = MemoryArtifacts::default();
        let coordinator = RecordingCoordinator::new(
            orchestrator,
            Arc::new(factory.clone()),
            RecorderSettings {
                base_path: dir.path().join("recordings"),
                fps: 30,
                ready_poll_interval: Duration::from_millis(10),
                ready_timeout,
            },
        );
        (coordinator, factory, dir)
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (coordinator, factory, _dir) = coordinator(
            vec![video("board", Duration::from_millis(5))],
            Duration::from_secs(5),
        );
        let mut events = coordinator.subscribe();
        coordinator.orchestrator().start_all();

        assert!(coordinator
            .start_recording(Some("lecture".to_string()))
            .await
            .unwrap());
        assert_eq!(coordinator.state(), RecordingState::Recording);
        assert!(!coordinator.start_recording(None).await.unwrap());
        assert!(matches!(events.recv().await.unwrap(), RecordingEvent::Started(name) if name == "lecture"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = coordinator.current_info();
        assert!(info.recording);
        assert!(info.time > 0.0);

        let summary = coordinator.stop_recording().await.unwrap().unwrap();
        assert_eq!(summary.name, "lecture");
        assert!(summary.frames["board"] > 0);
        assert_eq!(coordinator.state(), RecordingState::Idle);
        assert!(coordinator.stop_recording().await.unwrap().is_none());

        let info = coordinator.current_info();
        assert!(!info.recording);
        assert_eq!(info.time, summary.duration);
        assert!(factory.recorded.lock().finished >= 2);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_times_out_on_silent_source() {
        let (coordinator, _factory, _dir) = coordinator(
            vec![video("board", Duration::from_millis(5))],
            Duration::from_millis(100),
        );
        // Sources never started
        let result = coordinator.start_recording(None).await;
        assert!(matches!(result, Err(RecordingError::NotReady(ref ids)) if ids == &vec!["board".to_string()]));
        assert_eq!(coordinator.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_start() {
        let (coordinator, _factory, _dir) = coordinator(
            vec![video("board", Duration::from_millis(5))],
            Duration::from_secs(30),
        );
        let coordinator = Arc::new(coordinator);

        let starter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.start_recording(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.state(), RecordingState::Starting);

        assert!(coordinator.stop_recording().await.unwrap().is_none());
        let result = tokio::time::timeout(Duration::from_secs(1), starter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RecordingError::Cancelled)));
        assert_eq!(coordinator.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_session_name_stays_below_base_path() {
        let (coordinator, _factory, dir) = coordinator(
            vec![video("board", Duration::from_millis(5))],
            Duration::from_secs(5),
        );
        coordinator.orchestrator().start_all();

        let outside = dir.path().join("escaped");
        for name in [
            outside.to_string_lossy().to_string(),
            "../escaped".to_string(),
            "..".to_string(),
            "nested/name".to_string(),
            String::new(),
        ] {
            let result = coordinator.start_recording(Some(name.clone())).await;
            assert!(
                matches!(result, Err(RecordingError::InvalidName(ref rejected)) if *rejected == name),
                "{name:?} was accepted"
            );
            assert_eq!(coordinator.state(), RecordingState::Idle);
        }
        assert!(!outside.exists());
        assert!(!dir.path().join("recordings").exists());

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_claim_cancels_before_wait() {
        let (coordinator, _factory, _dir) = coordinator(
            vec![video("board", Duration::from_millis(5))],
            Duration::from_secs(5),
        );
        coordinator.orchestrator().start_all();

        let name = coordinator.begin_start(None).unwrap().unwrap();
        assert_eq!(coordinator.state(), RecordingState::Starting);
        assert!(coordinator.begin_start(None).unwrap().is_none());

        assert!(coordinator.stop_recording().await.unwrap().is_none());
        assert!(matches!(
            coordinator.finish_start(name).await,
            Err(RecordingError::Cancelled)
        ));
        assert_eq!(coordinator.state(), RecordingState::Idle);

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stage_commands_and_status() {
        let (coordinator, _factory, _dir) = coordinator(
            vec![
                video("board", Duration::from_millis(5)),
                video("slides", Duration::from_millis(5)),
            ],
            Duration::from_secs(1),
        );
        let board = SourceRef::Name("board".to_string());

        coordinator
            .set_stage_enabled(&board, "DeblurringStage", false)
            .unwrap();
        coordinator
            .set_parameter(&board, "DeblurringStage", "strength", &json!(2.5))
            .unwrap();

        assert!(matches!(
            coordinator.set_stage_enabled(&SourceRef::Name("missing".to_string()), "DeblurringStage", true),
            Err(RecordingError::UnknownSource(_))
        ));
        assert!(matches!(
            coordinator.set_stage_enabled(&board, "Missing", true),
            Err(RecordingError::Pipeline(PipelineError::UnknownStage(_)))
        ));
        assert!(coordinator
            .set_parameter(&board, "DeblurringStage", "strength", &json!("sharp"))
            .is_err());

        let info = coordinator.current_info();
        assert_eq!(info.stages.len(), 2);
        assert_eq!(info.stages[0].status.key, "board");
        assert!(!info.stages[0].status.status);
        assert_eq!(info.stages[0].params["strength"], json!(2.5));
        assert_eq!(info.stages[1].status.key, "slides");
        assert!(info.stages[1].status.status);
        assert!(!info.is_streaming);

        assert!(coordinator.toggle_preview());
        assert!(coordinator.current_info().is_streaming);
        coordinator.shutdown().await.unwrap();
        assert!(!coordinator.current_info().is_streaming);
    }
}
