//! On-disk artifacts of a recording session
//!
//! The persistence engine only talks to the [`ArtifactFactory`] seam. The
//! file implementations encode video through an FFmpeg subprocess, write the
//! metadata log as JSON lines plus a parallel-array index, and write audio as
//! 16-bit PCM WAV.

use hound::{WavSpec, WavWriter};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine already started")]
    AlreadyStarted,
}

/// One line of the metadata log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub frame_index: u64,
    pub timestamp: f64,
    /// Serialized frame metadata
    pub data: String,
}

/// Parallel-array index written when a metadata log is closed
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub frame_indices: Vec<u64>,
    pub timestamps: Vec<f64>,
    pub data: Vec<String>,
}

/// Video container accepting RGB frames of fixed dimensions
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PersistenceError>;
    fn finish(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Append-only metadata log
pub trait MetadataSink: Send {
    fn append(&mut self, entry: MetadataEntry) -> Result<(), PersistenceError>;
    fn finish(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// PCM container accepting interleaved float samples
pub trait AudioSink: Send {
    fn write_samples(&mut self, samples: &[f32]) -> Result<(), PersistenceError>;
    fn finish(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Creates the artifacts of one session
pub trait ArtifactFactory: Send + Sync {
    fn open_video(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, PersistenceError>;

    fn open_metadata(&self, path: &Path) -> Result<Box<dyn MetadataSink>, PersistenceError>;

    fn open_audio(
        &self,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn AudioSink>, PersistenceError>;
}

/// Bytes of encoder diagnostics kept for error reports
const STDERR_TAIL: usize = 4096;

/// FFmpeg H.264 encoder fed rgb24 frames on stdin
pub struct FfmpegVideoSink {
    process: Child,
    stdin: Option<ChildStdin>,
    stderr_reader: Option<JoinHandle<Vec<u8>>>,
    output: PathBuf,
    frame_count: u64,
}

impl FfmpegVideoSink {
    pub fn new(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, PersistenceError> {
        Self::with_program(Path::new("ffmpeg"), path, width, height, fps)
    }

    /// Spawn `program` with the encoder arguments
    pub fn with_program(
        program: &Path,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, PersistenceError> {
        let output = path.to_string_lossy().to_string();
        let mut process = Command::new(program)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostats",
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-framerate",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                "18",
                "-g",
                &(fps * 2).to_string(),
                "-movflags",
                "+faststart",
                &output,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PersistenceError::Encoder(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| PersistenceError::Encoder("Failed to capture FFmpeg stdin".to_string()))?;

        // A full stderr pipe would stall the encoder, so it is read as it comes
        let stderr_reader = process.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut tail = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend_from_slice(&buf[..n]);
                            if tail.len() > STDERR_TAIL {
                                let excess = tail.len() - STDERR_TAIL;
                                tail.drain(..excess);
                            }
                        }
                    }
                }
                tail
            })
        });

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps, output: {}",
            width,
            height,
            fps,
            output
        );

        Ok(Self {
            process,
            stdin: Some(stdin),
            stderr_reader,
            output: path.to_path_buf(),
            frame_count: 0,
        })
    }
}

impl VideoSink for FfmpegVideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), PersistenceError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PersistenceError::Encoder("Encoder already finished".to_string()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| PersistenceError::Encoder(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), PersistenceError> {
        let FfmpegVideoSink {
            mut process,
            stdin,
            stderr_reader,
            output: path,
            frame_count,
        } = *self;

        // Closing stdin signals EOF
        drop(stdin);

        let status = process
            .wait()
            .map_err(|e| PersistenceError::Encoder(format!("Failed to wait for FFmpeg: {}", e)))?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(PersistenceError::Encoder(format!(
                "FFmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        tracing::info!(
            "FFmpeg encoder finished: {} frames, output: {:?}",
            frame_count,
            path
        );
        Ok(())
    }
}

/// JSON-lines metadata log with a parallel-array index written on close
pub struct JsonMetadataSink {
    lines: BufWriter<File>,
    index_path: PathBuf,
    index: MetadataIndex,
}

impl JsonMetadataSink {
    /// Open `<path>` for lines; the index goes next to it as `.json`
    pub fn new(path: &Path) -> Result<Self, PersistenceError> {
        let file = File::create(path)?;
        Ok(Self {
            lines: BufWriter::new(file),
            index_path: path.with_extension("json"),
            index: MetadataIndex::default(),
        })
    }
}

impl MetadataSink for JsonMetadataSink {
    fn append(&mut self, entry: MetadataEntry) -> Result<(), PersistenceError> {
        serde_json::to_writer(&mut self.lines, &entry)?;
        self.lines.write_all(b"\n")?;

        self.index.frame_indices.push(entry.frame_index);
        self.index.timestamps.push(entry.timestamp);
        self.index.data.push(entry.data);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), PersistenceError> {
        self.lines.flush()?;
        self.lines.get_ref().sync_all()?;

        let file = File::create(&self.index_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.index)?;
        writer.flush()?;

        tracing::debug!(
            "Metadata index written: {:?} ({} entries)",
            self.index_path,
            self.index.frame_indices.len()
        );
        Ok(())
    }
}

/// Convert a float sample to 16-bit PCM
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// 16-bit PCM WAV writer
pub struct WavAudioSink {
    writer: WavWriter<BufWriter<File>>,
}

impl WavAudioSink {
    pub fn new(path: &Path, sample_rate: u32, channels: u16) -> Result<Self, PersistenceError> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let file = File::create(path)?;
        Ok(Self {
            writer: WavWriter::new(BufWriter::new(file), spec)?,
        })
    }
}

impl AudioSink for WavAudioSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<(), PersistenceError> {
        for &sample in samples {
            self.writer.write_sample(to_pcm16(sample))?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), PersistenceError> {
        self.writer.finalize()?;
        Ok(())
    }
}

/// Artifacts written to the local filesystem
#[derive(Debug, Default, Clone)]
pub struct FileArtifacts;

impl ArtifactFactory for FileArtifacts {
    fn open_video(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn VideoSink>, PersistenceError> {
        Ok(Box::new(FfmpegVideoSink::new(path, width, height, fps)?))
    }

    fn open_metadata(&self, path: &Path) -> Result<Box<dyn MetadataSink>, PersistenceError> {
        Ok(Box::new(JsonMetadataSink::new(path)?))
    }

    fn open_audio(
        &self,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Box<dyn AudioSink>, PersistenceError> {
        Ok(Box::new(WavAudioSink::new(path, sample_rate, channels)?))
    }
}
