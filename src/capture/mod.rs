//! Capture sources
//!
//! Video and audio acquisition loops, the buffers they publish into, the
//! orchestrator that owns them and the concrete FFmpeg / cpal transports.

pub mod audio;
pub mod buffer;
pub mod device;
pub mod ffmpeg;
pub mod orchestrator;
pub mod preview;
pub mod queue;
pub mod traits;
pub mod video;

pub use audio::AudioCapture;
pub use buffer::{BufferSlot, FrameRecord};
pub use device::{input_device_names, CpalAudioTransport};
pub use ffmpeg::FfmpegVideoOpener;
pub use orchestrator::{AudioTap, CaptureOrchestrator, FrameSource, PreviewSettings, Snapshot};
pub use queue::{AudioChunk, AudioQueue, QueueError, DEFAULT_QUEUE_CAPACITY};
pub use traits::{
    AudioSourceDescriptor, AudioTransport, TransportError, VideoOpener, VideoSourceDescriptor,
};
pub use video::VideoCapture;
