//! Persistence engine
//!
//! A fixed-cadence sampler that reads the latest frame of every video source
//! and drains every audio queue, independent of how fast the sources
//! produce. A frame that is still current on the next tick is written again,
//! so every video file has exactly one entry per tick.
//!
//! Layout of one session:
//!
//! ```text
//! <base>/<session>/videos/<id>/video.mp4
//! <base>/<session>/videos/<id>/data.jsonl   (+ data.json on close)
//! <base>/<session>/audios/<id>/audio.wav
//! ```

use super::artifacts::{
    ArtifactFactory, AudioSink, MetadataEntry, MetadataSink, PersistenceError, VideoSink,
};
use crate::capture::{AudioTap, FrameRecord, FrameSource};
use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::Mutex as ParkingMutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default sampling cadence in Hz
pub const DEFAULT_FPS: u32 = 30;

/// True when `name` is a single normal path component, usable as a
/// directory name below the session root
pub fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains(['/', '\\'])
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

/// Paths of one session's artifacts
#[derive(Debug, Clone)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(base: &Path, session: &str) -> Self {
        Self {
            root: base.join(session),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, source_id: &str) -> PathBuf {
        self.root.join("videos").join(source_id)
    }

    pub fn video_path(&self, source_id: &str) -> PathBuf {
        self.video_dir(source_id).join("video.mp4")
    }

    pub fn metadata_path(&self, source_id: &str) -> PathBuf {
        self.video_dir(source_id).join("data.jsonl")
    }

    pub fn audio_dir(&self, source_id: &str) -> PathBuf {
        self.root.join("audios").join(source_id)
    }

    pub fn audio_path(&self, source_id: &str) -> PathBuf {
        self.audio_dir(source_id).join("audio.wav")
    }

    /// Create the session directory tree
    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.root.join("videos"))?;
        std::fs::create_dir_all(self.root.join("audios"))?;
        Ok(())
    }
}

/// Time left in a tick; `None` when the tick overran
pub fn tick_remainder(interval: Duration, elapsed: Duration) -> Option<Duration> {
    interval.checked_sub(elapsed).filter(|d| !d.is_zero())
}

struct VideoTrack {
    video: Box<dyn VideoSink>,
    metadata: Box<dyn MetadataSink>,
    width: u32,
    height: u32,
    next_index: u64,
    last_timestamp: f64,
}

/// Per-session counters reported on stop
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub frames: BTreeMap<String, u64>,
    pub audio_samples: BTreeMap<String, u64>,
    /// Failed writes per source
    pub errors: BTreeMap<String, u64>,
}

/// Tick logic of the engine, without the thread or the pacing
pub struct Sampler {
    layout: SessionLayout,
    fps: u32,
    source: Arc<dyn FrameSource>,
    factory: Arc<dyn ArtifactFactory>,
    video: BTreeMap<String, VideoTrack>,
    audio: BTreeMap<String, Box<dyn AudioSink>>,
    failed: HashSet<String>,
    stats: SessionStats,
}

impl Sampler {
    pub fn new(
        layout: SessionLayout,
        fps: u32,
        source: Arc<dyn FrameSource>,
        factory: Arc<dyn ArtifactFactory>,
    ) -> Self {
        Self {
            layout,
            fps,
            source,
            factory,
            video: BTreeMap::new(),
            audio: BTreeMap::new(),
            failed: HashSet::new(),
            stats: SessionStats::default(),
        }
    }

    /// Sample every source once
    pub fn tick(&mut self) {
        self.stats.ticks += 1;

        for (source_id, record) in self.source.snapshot() {
            let Some(record) = record else {
                continue;
            };
            if self.failed.contains(&source_id) {
                continue;
            }
            if let Err(e) = self.write_video(&source_id, &record) {
                self.report_failure(&source_id, "frame", &e);
            }
        }

        self.drain_audio();
    }

    /// Drain every audio queue into its container
    pub fn drain_audio(&mut self) {
        for tap in self.source.audio_taps() {
            if self.failed.contains(&tap.id) {
                tap.queue.drain();
                continue;
            }
            if let Err(e) = self.write_audio(&tap) {
                self.report_failure(&tap.id, "audio", &e);
            }
        }
    }

    /// Logs the first failure of a source, then one line per ten seconds
    /// of failing ticks
    fn report_failure(&mut self, source_id: &str, what: &str, error: &PersistenceError) {
        let count = self.stats.errors.entry(source_id.to_string()).or_default();
        *count += 1;
        if *count == 1 || *count % (self.fps as u64 * 10) == 0 {
            tracing::error!(
                "[{}] Failed to persist {} ({} failures so far): {}",
                source_id,
                what,
                count,
                error
            );
        }
    }

    fn open_video_track(&self, source_id: &str, width: u32, height: u32) -> Result<VideoTrack, PersistenceError> {
        std::fs::create_dir_all(self.layout.video_dir(source_id))?;
        let video = self
            .factory
            .open_video(&self.layout.video_path(source_id), width, height, self.fps)?;
        let metadata = self
            .factory
            .open_metadata(&self.layout.metadata_path(source_id))?;

        tracing::info!(
            "[{}] Opened video artifacts {}x{} in {:?}",
            source_id,
            width,
            height,
            self.layout.video_dir(source_id)
        );
        Ok(VideoTrack {
            video,
            metadata,
            width,
            height,
            next_index: 0,
            last_timestamp: f64::MIN,
        })
    }

    fn write_video(&mut self, source_id: &str, record: &FrameRecord) -> Result<(), PersistenceError> {
        if !self.video.contains_key(source_id) {
            match self.open_video_track(source_id, record.image.width(), record.image.height()) {
                Ok(track) => {
                    self.video.insert(source_id.to_string(), track);
                }
                Err(e) => {
                    self.failed.insert(source_id.to_string());
                    return Err(e);
                }
            }
        }
        let Some(track) = self.video.get_mut(source_id) else {
            return Ok(());
        };

        let data = record.metadata.serialized()?;
        let frame = fit_frame(record, track.width, track.height);
        track.video.write_frame(&frame)?;

        // The index follows the video, even when the log append fails
        let timestamp = record.timestamp.max(track.last_timestamp);
        track.last_timestamp = timestamp;
        let entry = MetadataEntry {
            frame_index: track.next_index,
            timestamp,
            data,
        };
        track.next_index += 1;
        *self.stats.frames.entry(source_id.to_string()).or_default() += 1;

        track.metadata.append(entry)
    }

    fn write_audio(&mut self, tap: &AudioTap) -> Result<(), PersistenceError> {
        if !self.audio.contains_key(&tap.id) {
            let opened = std::fs::create_dir_all(self.layout.audio_dir(&tap.id))
                .map_err(PersistenceError::from)
                .and_then(|_| {
                    self.factory
                        .open_audio(&self.layout.audio_path(&tap.id), tap.sample_rate, tap.channels)
                });
            match opened {
                Ok(sink) => {
                    tracing::info!(
                        "[{}] Opened audio artifact ({}Hz, {}ch)",
                        tap.id,
                        tap.sample_rate,
                        tap.channels
                    );
                    self.audio.insert(tap.id.clone(), sink);
                }
                Err(e) => {
                    self.failed.insert(tap.id.clone());
                    tap.queue.drain();
                    return Err(e);
                }
            }
        }
        let Some(sink) = self.audio.get_mut(&tap.id) else {
            return Ok(());
        };

        for chunk in tap.queue.drain() {
            sink.write_samples(&chunk.samples)?;
            *self.stats.audio_samples.entry(tap.id.clone()).or_default() +=
                chunk.samples.len() as u64;
        }
        Ok(())
    }

    /// Flush and close every artifact
    pub fn finish(self) -> SessionStats {
        for (source_id, track) in self.video {
            if let Err(e) = track.video.finish() {
                tracing::error!("[{}] Failed to finish video: {}", source_id, e);
            }
            if let Err(e) = track.metadata.finish() {
                tracing::error!("[{}] Failed to finish metadata log: {}", source_id, e);
            }
        }
        for (source_id, sink) in self.audio {
            if let Err(e) = sink.finish() {
                tracing::error!("[{}] Failed to finish audio: {}", source_id, e);
            }
        }
        self.stats
    }
}

/// RGB frame at the container's dimensions
fn fit_frame(record: &FrameRecord, width: u32, height: u32) -> RgbImage {
    let rgb = record.image.to_rgb8();
    if rgb.dimensions() == (width, height) {
        rgb
    } else {
        imageops::resize(&rgb, width, height, FilterType::Triangle)
    }
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Recording,
    Stopped,
}

/// Background sampler for one recording session
pub struct PersistenceEngine {
    session: String,
    layout: SessionLayout,
    fps: u32,
    source: Arc<dyn FrameSource>,
    factory: Arc<dyn ArtifactFactory>,
    state: ParkingMutex<EngineState>,
    is_running: Arc<AtomicBool>,
    sampler_thread: ParkingMutex<Option<JoinHandle<SessionStats>>>,
    stats: ParkingMutex<Option<SessionStats>>,
}

impl PersistenceEngine {
    pub fn new(
        session: impl Into<String>,
        base_path: &Path,
        fps: u32,
        source: Arc<dyn FrameSource>,
        factory: Arc<dyn ArtifactFactory>,
    ) -> Self {
        let session = session.into();
        Self {
            layout: SessionLayout::new(base_path, &session),
            session,
            fps: fps.max(1),
            source,
            factory,
            state: ParkingMutex::new(EngineState::Idle),
            is_running: Arc::new(AtomicBool::new(false)),
            sampler_thread: ParkingMutex::new(None),
            stats: ParkingMutex::new(None),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Create the session directories and launch the sampler thread
    pub fn start(&self) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        if *state != EngineState::Idle {
            return Err(PersistenceError::AlreadyStarted);
        }

        self.layout.create()?;

        let mut sampler = Sampler::new(
            self.layout.clone(),
            self.fps,
            self.source.clone(),
            self.factory.clone(),
        );
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);
        let is_running = self.is_running.clone();
        let session = self.session.clone();

        is_running.store(true, Ordering::SeqCst);
        let handle = std::thread::spawn(move || {
            tracing::info!("[{}] Persistence started at {:?} per tick", session, interval);

            while is_running.load(Ordering::SeqCst) {
                let tick_start = Instant::now();
                sampler.tick();
                if let Some(remaining) = tick_remainder(interval, tick_start.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }

            // Audio that arrived during the last tick
            sampler.drain_audio();
            let stats = sampler.finish();
            tracing::info!(
                "[{}] Persistence stopped after {} ticks",
                session,
                stats.ticks
            );
            stats
        });

        *self.sampler_thread.lock() = Some(handle);
        *state = EngineState::Recording;
        Ok(())
    }

    /// Finish the current tick, close every artifact and return the session
    /// counters. Calling it again returns the same counters.
    pub fn stop(&self) -> Option<SessionStats> {
        let mut state = self.state.lock();
        if *state == EngineState::Recording {
            self.is_running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.sampler_thread.lock().take() {
                match handle.join() {
                    Ok(stats) => *self.stats.lock() = Some(stats),
                    Err(_) => tracing::error!("[{}] Persistence thread panicked", self.session),
                }
            }
            *state = EngineState::Stopped;
        }
        self.stats.lock().clone()
    }
}

impl Drop for PersistenceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::{AudioChunk, AudioQueue, BufferSlot, Snapshot};
    use crate::pipeline::FrameData;
    use image::{DynamicImage, GrayImage, Luma};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Everything written through a [`MemoryArtifacts`] factory
    #[derive(Default)]
    pub(crate) struct Recorded {
        pub frames: HashMap<PathBuf, Vec<(u32, u32)>>,
        pub entries: HashMap<PathBuf, Vec<MetadataEntry>>,
        pub samples: HashMap<PathBuf, Vec<f32>>,
        pub finished: usize,
    }

    #[derive(Default, Clone)]
    pub(crate) struct MemoryArtifacts {
        pub recorded: Arc<ParkingMutex<Recorded>>,
        pub fail_video: Option<String>,
        /// Number of upcoming metadata appends to reject
        pub fail_appends: Arc<AtomicUsize>,
    }

    struct MemoryVideo(PathBuf, Arc<ParkingMutex<Recorded>>);
    struct MemoryMetadata(PathBuf, Arc<ParkingMutex<Recorded>>, Arc<AtomicUsize>);
    struct MemoryAudio(PathBuf, Arc<ParkingMutex<Recorded>>);

    impl VideoSink for MemoryVideo {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PersistenceError> {
            self.1
                .lock()
                .frames
                .entry(self.0.clone())
                .or_default()
                .push(frame.dimensions());
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), PersistenceError> {
            self.1.lock().finished += 1;
            Ok(())
        }
    }

    impl MetadataSink for MemoryMetadata {
        fn append(&mut self, entry: MetadataEntry) -> Result<(), PersistenceError> {
            let rejected = self
                .2
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(PersistenceError::Io(std::io::Error::other("log unavailable")));
            }
            self.1.lock().entries.entry(self.0.clone()).or_default().push(entry);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), PersistenceError> {
            self.1.lock().finished += 1;
            Ok(())
        }
    }

    impl AudioSink for MemoryAudio {
        fn write_samples(&mut self, samples: &[f32]) -> Result<(), PersistenceError> {
            self.1
                .lock()
                .samples
                .entry(self.0.clone())
                .or_default()
                .extend_from_slice(samples);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), PersistenceError> {
            self.1.lock().finished += 1;
            Ok(())
        }
    }

    impl ArtifactFactory for MemoryArtifacts {
        fn open_video(
            &self,
            path: &Path,
            _width: u32,
            _height: u32,
            _fps: u32,
        ) -> Result<Box<dyn VideoSink>, PersistenceError> {
            if let Some(bad) = &self.fail_video {
                if path.components().any(|c| c.as_os_str() == bad.as_str()) {
                    return Err(PersistenceError::Encoder("disk full".to_string()));
                }
            }
            Ok(Box::new(MemoryVideo(path.to_path_buf(), self.recorded.clone())))
        }

        fn open_metadata(&self, path: &Path) -> Result<Box<dyn MetadataSink>, PersistenceError> {
            Ok(Box::new(MemoryMetadata(
                path.to_path_buf(),
                self.recorded.clone(),
                self.fail_appends.clone(),
            )))
        }

        fn open_audio(
            &self,
            path: &Path,
            _sample_rate: u32,
            _channels: u16,
        ) -> Result<Box<dyn AudioSink>, PersistenceError> {
            Ok(Box::new(MemoryAudio(path.to_path_buf(), self.recorded.clone())))
        }
    }

    /// Slots and queues driven directly by the test
    #[derive(Default)]
    pub(crate) struct ManualSource {
        pub slots: Vec<(String, Arc<BufferSlot>)>,
        pub taps: Vec<AudioTap>,
    }

    impl FrameSource for ManualSource {
        fn snapshot(&self) -> Snapshot {
            self.slots
                .iter()
                .map(|(id, slot)| (id.clone(), slot.latest()))
                .collect()
        }

        fn audio_taps(&self) -> Vec<AudioTap> {
            self.taps.clone()
        }
    }

    pub(crate) fn gray_record(timestamp: f64, width: u32, height: u32) -> FrameRecord {
        FrameRecord {
            timestamp,
            image: DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([7]))),
            metadata: FrameData::new(timestamp),
        }
    }

    fn tap(id: &str) -> AudioTap {
        let queue = Arc::new(AudioQueue::new(64));
        queue.arm();
        AudioTap {
            id: id.to_string(),
            sample_rate: 16000,
            channels: 1,
            queue,
        }
    }

    #[test]
    fn test_one_simulated_second() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "session");
        let a = Arc::new(BufferSlot::new());
        let b = Arc::new(BufferSlot::new());
        let mic = tap("mic");
        let source = Arc::new(ManualSource {
            slots: vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
            taps: vec![mic.clone()],
        });
        let factory = MemoryArtifacts::default();
        let recorded = factory.recorded.clone();

        // Both producers have a frame before the first tick
        a.publish(gray_record(1000.0, 8, 6));
        b.publish(gray_record(2000.0, 4, 4));

        let mut sampler = Sampler::new(layout.clone(), 30, source, Arc::new(factory));
        for tick in 0..30u32 {
            // 10 fps producers against a 30 Hz sampler
            if tick % 3 == 0 && tick > 0 {
                a.publish(gray_record(1000.0 + tick as f64 / 30.0, 8, 6));
                b.publish(gray_record(2000.0 + tick as f64 / 30.0, 4, 4));
            }
            mic.queue
                .push(AudioChunk {
                    samples: vec![tick as f32; 4],
                    captured_at: tick as f64,
                })
                .unwrap();
            sampler.tick();
        }
        let stats = sampler.finish();

        let recorded = recorded.lock();
        for id in ["a", "b"] {
            let entries = &recorded.entries[&layout.metadata_path(id)];
            assert_eq!(entries.len(), 30);
            let indices: Vec<u64> = entries.iter().map(|e| e.frame_index).collect();
            assert_eq!(indices, (0..30).collect::<Vec<u64>>());
            assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            // Producer is slower than the cadence, so frames repeat
            assert_eq!(entries[0].timestamp, entries[1].timestamp);
            assert_eq!(entries[1].timestamp, entries[2].timestamp);
            assert!(entries[3].timestamp > entries[2].timestamp);
            assert_eq!(recorded.frames[&layout.video_path(id)].len(), 30);
            assert_eq!(stats.frames[id], 30);
        }

        let samples = &recorded.samples[&layout.audio_path("mic")];
        assert_eq!(samples.len(), 120);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[119], 29.0);
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));

        // Two videos, two metadata logs, one audio
        assert_eq!(recorded.finished, 5);
        assert_eq!(stats.ticks, 30);
    }

    #[test]
    fn test_frames_fit_first_dimensions() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "session");
        let slot = Arc::new(BufferSlot::new());
        let source = Arc::new(ManualSource {
            slots: vec![("cam".to_string(), slot.clone())],
            taps: vec![],
        });
        let factory = MemoryArtifacts::default();
        let recorded = factory.recorded.clone();
        let mut sampler = Sampler::new(layout.clone(), 30, source, Arc::new(factory));

        slot.publish(gray_record(1.0, 10, 10));
        sampler.tick();
        slot.publish(gray_record(2.0, 5, 3));
        sampler.tick();
        sampler.finish();

        let frames = &recorded.lock().frames[&layout.video_path("cam")];
        assert_eq!(frames, &vec![(10, 10), (10, 10)]);
    }

    #[test]
    fn test_open_failure_is_isolated() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "session");
        let good = Arc::new(BufferSlot::new());
        let bad = Arc::new(BufferSlot::new());
        good.publish(gray_record(1.0, 4, 4));
        bad.publish(gray_record(1.0, 4, 4));

        let source = Arc::new(ManualSource {
            slots: vec![("bad".to_string(), bad), ("good".to_string(), good)],
            taps: vec![],
        });
        let factory = MemoryArtifacts {
            fail_video: Some("bad".to_string()),
            ..Default::default()
        };
        let recorded = factory.recorded.clone();
        let mut sampler = Sampler::new(layout.clone(), 30, source, Arc::new(factory));
        for _ in 0..3 {
            sampler.tick();
        }
        sampler.finish();

        let recorded = recorded.lock();
        assert_eq!(recorded.entries[&layout.metadata_path("good")].len(), 3);
        assert!(!recorded.entries.contains_key(&layout.metadata_path("bad")));
    }

    #[test]
    fn test_failed_append_keeps_indices_aligned() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "session");
        let slot = Arc::new(BufferSlot::new());
        slot.publish(gray_record(1.0, 4, 4));
        let source = Arc::new(ManualSource {
            slots: vec![("cam".to_string(), slot)],
            taps: vec![],
        });
        let factory = MemoryArtifacts::default();
        let recorded = factory.recorded.clone();
        let fail_appends = factory.fail_appends.clone();
        let mut sampler = Sampler::new(layout.clone(), 30, source, Arc::new(factory));

        sampler.tick();
        fail_appends.store(1, Ordering::SeqCst);
        sampler.tick();
        sampler.tick();
        let stats = sampler.finish();

        let recorded = recorded.lock();
        assert_eq!(recorded.frames[&layout.video_path("cam")].len(), 3);
        let indices: Vec<u64> = recorded.entries[&layout.metadata_path("cam")]
            .iter()
            .map(|e| e.frame_index)
            .collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(stats.frames["cam"], 3);
        assert_eq!(stats.errors["cam"], 1);
    }

    #[test]
    fn test_open_failure_is_counted_once_per_tick() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "session");
        let bad = Arc::new(BufferSlot::new());
        bad.publish(gray_record(1.0, 4, 4));
        let source = Arc::new(ManualSource {
            slots: vec![("bad".to_string(), bad)],
            taps: vec![],
        });
        let factory = MemoryArtifacts {
            fail_video: Some("bad".to_string()),
            ..Default::default()
        };
        let mut sampler = Sampler::new(layout, 30, source, Arc::new(factory));
        for _ in 0..5 {
            sampler.tick();
        }
        // Skipped after the failed open
        assert_eq!(sampler.finish().errors["bad"], 1);
    }

    #[test]
    fn test_plain_component() {
        for name in ["board", "lecture-1", "recording-20240101-120000-ab12cd34", "a.b"] {
            assert!(is_plain_component(name), "{name}");
        }
        for name in ["", ".", "..", "../up", "a/b", "a\\b", "/tmp/escaped", "C:\\x"] {
            assert!(!is_plain_component(name), "{name}");
        }
    }

    #[test]
    fn test_tick_remainder_never_negative() {
        let interval = Duration::from_millis(33);
        assert_eq!(
            tick_remainder(interval, Duration::from_millis(10)),
            Some(Duration::from_millis(23))
        );
        assert_eq!(tick_remainder(interval, Duration::from_millis(33)), None);
        assert_eq!(tick_remainder(interval, Duration::from_millis(50)), None);
    }

    #[test]
    fn test_engine_lifecycle() {
        let dir = tempdir().unwrap();
        let slot = Arc::new(BufferSlot::new());
        slot.publish(gray_record(1.0, 4, 4));
        let source = Arc::new(ManualSource {
            slots: vec![("cam".to_string(), slot)],
            taps: vec![tap("mic")],
        });
        let factory = MemoryArtifacts::default();
        let recorded = factory.recorded.clone();

        let engine = PersistenceEngine::new("lecture", dir.path(), 100, source, Arc::new(factory));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.stop().is_none());
        assert_eq!(engine.state(), EngineState::Idle);

        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(PersistenceError::AlreadyStarted)));
        assert!(dir.path().join("lecture").join("videos").is_dir());
        assert!(dir.path().join("lecture").join("audios").is_dir());

        std::thread::sleep(Duration::from_millis(100));
        let first = engine.stop().unwrap();
        let second = engine.stop().unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(first.frames["cam"] > 0);

        let recorded = recorded.lock();
        let entries = &recorded.entries[&engine.layout().metadata_path("cam")];
        assert_eq!(entries.len() as u64, first.frames["cam"]);
        // video + metadata + audio, each closed exactly once
        assert_eq!(recorded.finished, 3);
        assert!(matches!(engine.start(), Err(PersistenceError::AlreadyStarted)));
    }
}
