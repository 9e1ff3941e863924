//! Latest-value frame buffer
//!
//! Each video source publishes into its own [`BufferSlot`]. The slot holds at
//! most one record; publishing replaces it. Readers clone an `Arc` under a
//! short lock, so they never wait on the acquisition loop and it never waits
//! on them.

use crate::pipeline::FrameData;
use image::DynamicImage;
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;

/// A processed frame with its capture time and stage metadata
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Capture timestamp (unix seconds)
    pub timestamp: f64,

    /// Frame after the processing pipeline
    pub image: DynamicImage,

    /// Stage-produced metadata
    pub metadata: FrameData,
}

/// Single-slot "latest value wins" cell
#[derive(Debug, Default)]
pub struct BufferSlot {
    latest: ParkingMutex<Option<Arc<FrameRecord>>>,
}

impl BufferSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents
    pub fn publish(&self, record: FrameRecord) {
        let record = Arc::new(record);
        *self.latest.lock() = Some(record);
    }

    /// Most recent record, if any
    pub fn latest(&self) -> Option<Arc<FrameRecord>> {
        self.latest.lock().clone()
    }

    /// Whether at least one frame has been published
    pub fn is_ready(&self) -> bool {
        self.latest.lock().is_some()
    }
}
