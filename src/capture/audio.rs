//! Audio capture source
//!
//! The transport invokes a realtime callback per block; the callback copies
//! the block into the source's [`AudioQueue`] and never blocks. The stream
//! lives on a dedicated thread because device streams are not `Send`.

use super::queue::{AudioChunk, AudioQueue, QueueError};
use super::traits::{AudioCallback, AudioSourceDescriptor, AudioStatus, AudioTransport};
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Build the realtime callback feeding `queue`
fn queue_callback(source_id: String, queue: Arc<AudioQueue>) -> AudioCallback {
    Box::new(move |samples: &[f32], captured_at: f64, status: AudioStatus| {
        if status.input_overflow {
            tracing::debug!("[{}] Audio input overflow", source_id);
        }

        let chunk = AudioChunk {
            samples: samples.to_vec(),
            captured_at,
        };
        if let Err(e) = queue.push(chunk) {
            let dropped = queue.dropped();
            // Rate-limit while the queue stays unavailable
            if dropped == 1 || dropped % 500 == 0 {
                match e {
                    QueueError::Full => {
                        tracing::warn!("[{}] Audio queue full, dropped {} blocks", source_id, dropped)
                    }
                    QueueError::Closed => {
                        tracing::error!("[{}] Audio queue closed, dropped {} blocks", source_id, dropped)
                    }
                }
            }
        }
    })
}

/// An audio source feeding a bounded FIFO
pub struct AudioCapture {
    descriptor: AudioSourceDescriptor,
    transport: Arc<dyn AudioTransport>,
    queue: Arc<AudioQueue>,
    is_running: Arc<AtomicBool>,
    capture_thread: ParkingMutex<Option<JoinHandle<()>>>,
}

impl AudioCapture {
    pub fn new(
        descriptor: AudioSourceDescriptor,
        transport: Arc<dyn AudioTransport>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            descriptor,
            transport,
            queue: Arc::new(AudioQueue::new(queue_capacity)),
            is_running: Arc::new(AtomicBool::new(false)),
            capture_thread: ParkingMutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AudioSourceDescriptor {
        &self.descriptor
    }

    pub fn queue(&self) -> &Arc<AudioQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Open the stream on its own thread. No-op while running.
    pub fn start(&self) {
        let mut thread = self.capture_thread.lock();
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(finished) = thread.take() {
            let _ = finished.join();
        }

        let descriptor = self.descriptor.clone();
        let transport = self.transport.clone();
        let queue = self.queue.clone();
        let is_running = self.is_running.clone();

        *thread = Some(std::thread::spawn(move || {
            let callback = queue_callback(descriptor.id.clone(), queue);
            let stream = match transport.open(&descriptor, callback) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("[{}] Failed to open audio device: {}", descriptor.id, e);
                    is_running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            tracing::info!(
                "[{}] Audio capture started ({}Hz, {}ch)",
                descriptor.id,
                descriptor.sample_rate,
                descriptor.channels
            );

            // Keep the stream alive while running
            while is_running.load(Ordering::SeqCst) {
                std::thread::sleep(STREAM_POLL_INTERVAL);
            }

            if let Err(e) = stream.pause() {
                tracing::warn!("[{}] Error stopping audio stream: {}", descriptor.id, e);
            }
            drop(stream);
            tracing::info!("[{}] Audio capture stopped", descriptor.id);
        }));
    }

    /// Close the stream and wait for the thread. No-op when not running.
    pub fn stop(&self) {
        let mut thread = self.capture_thread.lock();
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                tracing::error!("[{}] Audio capture thread panicked", self.descriptor.id);
            }
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::traits::{AudioStream, TransportError};
    use std::sync::atomic::AtomicUsize;

    /// Delivers blocks from a helper thread until the stream is paused
    pub(crate) struct ToneTransport {
        pub block: usize,
        pub interval: Duration,
        pub closed: Arc<AtomicUsize>,
    }

    struct ToneStream {
        active: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
        closed: Arc<AtomicUsize>,
    }

    impl AudioStream for ToneStream {
        fn pause(&self) -> Result<(), TransportError> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for ToneStream {
        fn drop(&mut self) {
            self.active.store(false, Ordering::SeqCst);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AudioTransport for ToneTransport {
        fn open(
            &self,
            _descriptor: &AudioSourceDescriptor,
            mut callback: AudioCallback,
        ) -> Result<Box<dyn AudioStream>, TransportError> {
            let active = Arc::new(AtomicBool::new(true));
            let block = self.block;
            let interval = self.interval;
            let worker = {
                let active = active.clone();
                std::thread::spawn(move || {
                    let mut n = 0.0f64;
                    while active.load(Ordering::SeqCst) {
                        callback(&vec![0.25f32; block][..], n, AudioStatus::default());
                        n += 1.0;
                        std::thread::sleep(interval);
                    }
                })
            };
            Ok(Box::new(ToneStream {
                active,
                worker: Some(worker),
                closed: self.closed.clone(),
            }))
        }
    }

    pub(crate) fn descriptor(id: &str) -> AudioSourceDescriptor {
        AudioSourceDescriptor {
            id: id.to_string(),
            device: "default".to_string(),
            sample_rate: 8000,
            channels: 1,
            block_size: None,
        }
    }

    #[test]
    fn test_blocks_reach_queue_only_when_armed() {
        let closed = Arc::new(AtomicUsize::new(0));
        let capture = AudioCapture::new(
            descriptor("mic"),
            Arc::new(ToneTransport {
                block: 16,
                interval: Duration::from_millis(2),
                closed: closed.clone(),
            }),
            64,
        );

        capture.start();
        std::thread::sleep(Duration::from_millis(30));
        assert!(capture.queue().is_empty());

        capture.queue().arm();
        std::thread::sleep(Duration::from_millis(50));
        capture.stop();
        capture.stop();

        let chunks = capture.queue().drain();
        assert!(!chunks.is_empty());
        assert!(chunks.windows(2).all(|w| w[0].captured_at < w[1].captured_at));
        assert_eq!(chunks[0].samples.len(), 16);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_queue_drops_without_blocking() {
        let capture = AudioCapture::new(
            descriptor("mic"),
            Arc::new(ToneTransport {
                block: 4,
                interval: Duration::from_millis(1),
                closed: Arc::new(AtomicUsize::new(0)),
            }),
            8,
        );
        capture.queue().arm();
        capture.queue().close();

        capture.start();
        std::thread::sleep(Duration::from_millis(30));
        capture.stop();

        assert!(capture.queue().is_empty());
        assert!(capture.queue().dropped() > 0);
    }
}
