//! Capture trait definitions
//!
//! Transport-agnostic seams between capture sources and the devices or
//! decoders that feed them.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open source {source_id}: {reason}")]
    Open { source_id: String, reason: String },

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of a video source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSourceDescriptor {
    /// Unique source id
    pub id: String,

    /// Device path, file or URL
    pub source: String,

    /// Demuxer name for the source (e.g. `v4l2`), auto-detected when unset
    #[serde(default)]
    pub input_format: Option<String>,

    /// Frame width; probed when unset
    #[serde(default)]
    pub width: Option<u32>,

    /// Frame height; probed when unset
    #[serde(default)]
    pub height: Option<u32>,

    /// Pace file input at its native frame rate
    #[serde(default)]
    pub realtime: bool,
}

/// Identity of an audio source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSourceDescriptor {
    /// Unique source id
    pub id: String,

    /// Input device name, `default` for the host default
    #[serde(default = "default_device")]
    pub device: String,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Interleaved channel count
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frames per callback block, host default when unset
    #[serde(default)]
    pub block_size: Option<u32>,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u16 {
    1
}

/// An open video handle. Reads block until the next frame is decoded.
pub trait VideoTransport: Send {
    /// Next frame, `Ok(None)` at end of stream
    fn read(&mut self) -> Result<Option<DynamicImage>, TransportError>;

    /// Release the underlying device or decoder
    fn release(&mut self);
}

/// Opens video transports for descriptors
pub trait VideoOpener: Send + Sync {
    fn open(&self, descriptor: &VideoSourceDescriptor) -> Result<Box<dyn VideoTransport>, TransportError>;
}

/// Per-block status reported by an audio transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStatus {
    /// Samples were lost before this block
    pub input_overflow: bool,
}

/// Realtime block callback: `(interleaved samples, capture timestamp, status)`
pub type AudioCallback = Box<dyn FnMut(&[f32], f64, AudioStatus) + Send + 'static>;

/// A running audio stream. Dropping it closes the stream.
///
/// Streams may be tied to the thread that opened them and are therefore not
/// required to be `Send`.
pub trait AudioStream {
    /// Stop delivering blocks
    fn pause(&self) -> Result<(), TransportError>;
}

/// Opens audio input streams
pub trait AudioTransport: Send + Sync {
    fn open(
        &self,
        descriptor: &AudioSourceDescriptor,
        callback: AudioCallback,
    ) -> Result<Box<dyn AudioStream>, TransportError>;
}
