//! Live preview writer
//!
//! Periodically encodes the latest frame of every video source to
//! `<dir>/<source>.png` so an operator can watch the processed output.

use super::buffer::BufferSlot;
use image::DynamicImage;
use parking_lot::Mutex as ParkingMutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Encode `image` as PNG, replacing `path` atomically
pub fn write_png(path: &Path, image: &DynamicImage) -> Result<(), png::EncodingError> {
    let (color, width, height, data) = match image {
        DynamicImage::ImageLuma8(gray) => (
            png::ColorType::Grayscale,
            gray.width(),
            gray.height(),
            gray.as_raw().clone(),
        ),
        other => {
            let rgb = other.to_rgb8();
            (png::ColorType::Rgb, rgb.width(), rgb.height(), rgb.into_raw())
        }
    };

    let tmp_path = path.with_extension("png.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&data)?;
        writer.finish()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Background PNG preview of every video source
pub struct PreviewWriter {
    dir: PathBuf,
    interval: Duration,
    sources: Vec<(String, Arc<BufferSlot>)>,
    is_running: Arc<AtomicBool>,
    thread: ParkingMutex<Option<JoinHandle<()>>>,
}

impl PreviewWriter {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration, sources: Vec<(String, Arc<BufferSlot>)>) -> Self {
        Self {
            dir: dir.into(),
            interval,
            sources,
            is_running: Arc::new(AtomicBool::new(false)),
            thread: ParkingMutex::new(None),
        }
    }

    /// Whether preview frames are being written
    pub fn is_streaming(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock();
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(finished) = thread.take() {
            let _ = finished.join();
        }

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::error!("Failed to create preview directory {:?}: {}", self.dir, e);
            self.is_running.store(false, Ordering::SeqCst);
            return;
        }

        let dir = self.dir.clone();
        let interval = self.interval;
        let sources = self.sources.clone();
        let is_running = self.is_running.clone();

        *thread = Some(std::thread::spawn(move || {
            tracing::info!("Preview started: {:?}", dir);
            let mut written: Vec<Option<f64>> = vec![None; sources.len()];

            while is_running.load(Ordering::SeqCst) {
                for ((id, slot), last) in sources.iter().zip(written.iter_mut()) {
                    let Some(record) = slot.latest() else {
                        continue;
                    };
                    if *last == Some(record.timestamp) {
                        continue;
                    }
                    let path = dir.join(format!("{id}.png"));
                    match write_png(&path, &record.image) {
                        Ok(()) => *last = Some(record.timestamp),
                        Err(e) => tracing::warn!("[{}] Failed to write preview: {}", id, e),
                    }
                }
                std::thread::sleep(interval);
            }
            tracing::info!("Preview stopped");
        }));
    }

    pub fn stop(&self) {
        let mut thread = self.thread.lock();
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = thread.take() {
            let _ = handle.join();
        }
    }

    /// Flip preview on or off; returns the new state
    pub fn toggle(&self) -> bool {
        if self.is_streaming() {
            self.stop();
        } else {
            self.start();
        }
        self.is_streaming()
    }
}

impl Drop for PreviewWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::buffer::FrameRecord;
    use crate::pipeline::FrameData;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn test_write_png_roundtrip_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(7, 5, Rgb([10, 20, 30])));

        write_png(&path, &image).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        assert_eq!(reader.info().width, 7);
        assert_eq!(reader.info().height, 5);
        assert!(!dir.path().join("frame.png.tmp").exists());
    }

    #[test]
    fn test_toggle_writes_latest_frame() {
        let dir = tempdir().unwrap();
        let slot = Arc::new(BufferSlot::new());
        slot.publish(FrameRecord {
            timestamp: 1.0,
            image: DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
            metadata: FrameData::new(1.0),
        });

        let preview = PreviewWriter::new(
            dir.path().join("preview"),
            Duration::from_millis(5),
            vec![("cam".to_string(), slot)],
        );

        assert!(preview.toggle());
        let path = dir.path().join("preview").join("cam.png");
        for _ in 0..200 {
            if path.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!preview.toggle());
        assert!(path.exists());
        assert!(!preview.is_streaming());
    }
}
