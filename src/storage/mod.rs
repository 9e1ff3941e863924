//! Session persistence
//!
//! Samples every capture source at a fixed cadence and writes one video,
//! one metadata log and one audio file per source.

pub mod artifacts;
pub mod engine;

pub use artifacts::{
    ArtifactFactory, AudioSink, FileArtifacts, MetadataEntry, MetadataIndex, MetadataSink,
    PersistenceError, VideoSink,
};
pub use engine::{
    is_plain_component, EngineState, PersistenceEngine, Sampler, SessionLayout, SessionStats,
    DEFAULT_FPS,
};
