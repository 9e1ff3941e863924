//! Recording sessions
//!
//! - RecordingState / RecordingSession bookkeeping
//! - RecordingCoordinator, the façade the control commands drive

pub mod coordinator;
pub mod state;

pub use coordinator::{RecorderSettings, RecordingCoordinator, RecordingError, RecordingEvent, RecordingResult};
pub use state::{session_name, RecordingSession, RecordingState, RecordingSummary};
