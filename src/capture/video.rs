//! Video capture source
//!
//! One acquisition thread per source: read a frame, stamp it, run it through
//! the source's processing pipeline and publish the result into the source's
//! buffer slot. Nothing downstream can slow the loop down; frames that are
//! not sampled in time are overwritten.

use super::buffer::{BufferSlot, FrameRecord};
use super::traits::{VideoOpener, VideoSourceDescriptor};
use crate::pipeline::ProcessingPipeline;
use crate::utils::unix_now;
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A video source driving its own acquisition loop
pub struct VideoCapture {
    descriptor: VideoSourceDescriptor,
    opener: Arc<dyn VideoOpener>,
    pipeline: Arc<ProcessingPipeline>,
    slot: Arc<BufferSlot>,
    is_running: Arc<AtomicBool>,
    capture_thread: ParkingMutex<Option<JoinHandle<()>>>,
}

impl VideoCapture {
    pub fn new(
        descriptor: VideoSourceDescriptor,
        opener: Arc<dyn VideoOpener>,
        pipeline: ProcessingPipeline,
    ) -> Self {
        Self {
            descriptor,
            opener,
            pipeline: Arc::new(pipeline),
            slot: Arc::new(BufferSlot::new()),
            is_running: Arc::new(AtomicBool::new(false)),
            capture_thread: ParkingMutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &VideoSourceDescriptor {
        &self.descriptor
    }

    pub fn pipeline(&self) -> &Arc<ProcessingPipeline> {
        &self.pipeline
    }

    pub fn slot(&self) -> &Arc<BufferSlot> {
        &self.slot
    }

    /// Whether the acquisition loop is alive
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Spawn the acquisition loop. No-op while running.
    pub fn start(&self) {
        let mut thread = self.capture_thread.lock();
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        // Reap a loop that ended on its own (EOF or read failure)
        if let Some(finished) = thread.take() {
            let _ = finished.join();
        }

        let descriptor = self.descriptor.clone();
        let opener = self.opener.clone();
        let pipeline = self.pipeline.clone();
        let slot = self.slot.clone();
        let is_running = self.is_running.clone();

        *thread = Some(std::thread::spawn(move || {
            let mut transport = match opener.open(&descriptor) {
                Ok(transport) => transport,
                Err(e) => {
                    tracing::error!("[{}] Failed to open video source: {}", descriptor.id, e);
                    is_running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            tracing::info!("[{}] Video capture started ({})", descriptor.id, descriptor.source);

            let mut frame_count: u64 = 0;
            let mut last_timestamp = 0.0f64;

            while is_running.load(Ordering::SeqCst) {
                match transport.read() {
                    Ok(Some(image)) => {
                        let timestamp = unix_now().max(last_timestamp);
                        last_timestamp = timestamp;

                        let (image, metadata) = pipeline.process(image, timestamp);
                        slot.publish(FrameRecord {
                            timestamp,
                            image,
                            metadata,
                        });
                        frame_count += 1;
                    }
                    Ok(None) => {
                        tracing::info!("[{}] End of video stream", descriptor.id);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("[{}] Failed to grab frame: {}", descriptor.id, e);
                        break;
                    }
                }
            }

            transport.release();
            is_running.store(false, Ordering::SeqCst);
            tracing::info!(
                "[{}] Video capture stopped after {} frames",
                descriptor.id,
                frame_count
            );
        }));
    }

    /// Signal the loop to exit and wait until it has released the transport.
    /// No-op when not running.
    pub fn stop(&self) {
        let mut thread = self.capture_thread.lock();
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                tracing::error!("[{}] Video capture thread panicked", self.descriptor.id);
            }
        }
    }
}

impl Drop for VideoCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::traits::{TransportError, VideoTransport};
    use crate::pipeline::null_detector;
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Produces numbered frames at a fixed interval, then EOF or an error
    pub(crate) struct ScriptedTransport {
        pub remaining: Option<usize>,
        pub interval: Duration,
        pub fail_at_end: bool,
        pub counter: u8,
        pub released: Arc<AtomicUsize>,
    }

    impl VideoTransport for ScriptedTransport {
        fn read(&mut self) -> Result<Option<DynamicImage>, TransportError> {
            if let Some(remaining) = self.remaining.as_mut() {
                if *remaining == 0 {
                    if self.fail_at_end {
                        return Err(TransportError::Read("device unplugged".to_string()));
                    }
                    return Ok(None);
                }
                *remaining -= 1;
            }
            std::thread::sleep(self.interval);
            self.counter = self.counter.wrapping_add(1);
            Ok(Some(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                4,
                3,
                Luma([self.counter]),
            ))))
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) struct ScriptedOpener {
        pub frames: Option<usize>,
        pub interval: Duration,
        pub fail_open: bool,
        pub fail_at_end: bool,
        pub released: Arc<AtomicUsize>,
    }

    impl ScriptedOpener {
        pub(crate) fn endless(interval: Duration) -> Self {
            Self {
                frames: None,
                interval,
                fail_open: false,
                fail_at_end: false,
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl VideoOpener for ScriptedOpener {
        fn open(
            &self,
            descriptor: &VideoSourceDescriptor,
        ) -> Result<Box<dyn VideoTransport>, TransportError> {
            if self.fail_open {
                return Err(TransportError::Open {
                    source_id: descriptor.id.clone(),
                    reason: "no such device".to_string(),
                });
            }
            Ok(Box::new(ScriptedTransport {
                remaining: self.frames,
                interval: self.interval,
                fail_at_end: self.fail_at_end,
                counter: 0,
                released: self.released.clone(),
            }))
        }
    }

    pub(crate) fn descriptor(id: &str) -> VideoSourceDescriptor {
        VideoSourceDescriptor {
            id: id.to_string(),
            source: format!("scripted://{id}"),
            input_format: None,
            width: None,
            height: None,
            realtime: false,
        }
    }

    fn capture(opener: ScriptedOpener) -> VideoCapture {
        VideoCapture::new(
            descriptor("cam"),
            Arc::new(opener),
            ProcessingPipeline::new("cam", null_detector()),
        )
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_publishes_frames() {
        let capture = capture(ScriptedOpener::endless(Duration::from_millis(2)));
        capture.start();
        assert!(wait_until(|| capture.slot().is_ready()));

        let first = capture.slot().latest().unwrap();
        assert!(wait_until(|| capture.slot().latest().unwrap().timestamp > first.timestamp));
        assert_eq!(first.metadata.timestamp, first.timestamp);

        capture.stop();
        assert!(!capture.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_releases() {
        let opener = ScriptedOpener::endless(Duration::from_millis(1));
        let released = opener.released.clone();
        let capture = capture(opener);

        capture.stop();
        capture.start();
        capture.start();
        capture.stop();
        capture.stop();

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!capture.is_running());
    }

    #[test]
    fn test_read_failure_ends_loop() {
        let opener = ScriptedOpener {
            frames: Some(3),
            fail_at_end: true,
            ..ScriptedOpener::endless(Duration::from_millis(1))
        };
        let released = opener.released.clone();
        let capture = capture(opener);

        capture.start();
        assert!(wait_until(|| !capture.is_running()));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(capture.slot().is_ready());
        capture.stop();
    }

    #[test]
    fn test_open_failure_leaves_slot_empty() {
        let opener = ScriptedOpener {
            fail_open: true,
            ..ScriptedOpener::endless(Duration::from_millis(1))
        };
        let capture = capture(opener);

        capture.start();
        assert!(wait_until(|| !capture.is_running()));
        assert!(!capture.slot().is_ready());
        capture.stop();
    }
}
