//! Recording state management
//!
//! Defines the recording state machine and session bookkeeping.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Waiting for every video source to produce a frame
    Starting,
    /// Persistence is running
    Recording,
    /// Persistence is flushing its artifacts
    Stopping,
}

/// One bounded recording interval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub is_active: bool,
}

impl RecordingSession {
    /// Create a session starting now
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            is_active: true,
        }
    }

    /// Seconds since the session started
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Mark the session finished; returns its length in seconds
    pub fn end(&mut self) -> f64 {
        self.is_active = false;
        self.elapsed_secs()
    }
}

/// Default session name: `recording-<YYYYmmdd-HHMMSS>-<short uuid>`
pub fn session_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "recording-{}-{}",
        Local::now().format("%Y%m%d-%H%M%S"),
        &id[..8]
    )
}

/// Summary of a stopped session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub name: String,
    /// Session length in seconds, rounded to 0.01
    pub duration: f64,
    pub frames: std::collections::BTreeMap<String, u64>,
}
