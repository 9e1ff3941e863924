//! Audio FIFO between the realtime callback and the persistence sampler
//!
//! Bounded and lock-free so the callback never blocks. The queue only accepts
//! blocks while armed (a session is recording); a closed queue rejects
//! everything.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// Default capacity in blocks
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// A block of interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub captured_at: f64,
}

/// Queue push failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("audio queue is full")]
    Full,

    #[error("audio queue is closed")]
    Closed,
}

/// Outcome of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Not armed; the block was discarded
    Discarded,
}

/// Bounded audio FIFO
#[derive(Debug)]
pub struct AudioQueue {
    chunks: ArrayQueue<AudioChunk>,
    armed: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: ArrayQueue::new(capacity.max(1)),
            armed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Start accepting blocks, discarding anything left from a previous session
    pub fn arm(&self) {
        while self.chunks.pop().is_some() {}
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Stop accepting blocks
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Put the queue into its failure state
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Leave the failure state
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Non-blocking push
    pub fn push(&self, chunk: AudioChunk) -> Result<Pushed, QueueError> {
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Closed);
        }
        if !self.is_armed() {
            return Ok(Pushed::Discarded);
        }
        match self.chunks.push(chunk) {
            Ok(()) => Ok(Pushed::Queued),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(QueueError::Full)
            }
        }
    }

    pub fn pop(&self) -> Option<AudioChunk> {
        self.chunks.pop()
    }

    /// Remove every queued block in arrival order
    pub fn drain(&self) -> Vec<AudioChunk> {
        let mut chunks = Vec::with_capacity(self.chunks.len());
        while let Some(chunk) = self.chunks.pop() {
            chunks.push(chunk);
        }
        chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Blocks dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
