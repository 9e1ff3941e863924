//! FFmpeg video transport
//!
//! Decodes any FFmpeg-readable device, file or URL into raw RGB frames on
//! stdout. Frame dimensions come from the descriptor or from `ffprobe`.

use super::traits::{TransportError, VideoOpener, VideoSourceDescriptor, VideoTransport};
use image::{DynamicImage, RgbImage};
use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Probe the first video stream of `source` for its dimensions
pub fn probe_dimensions(descriptor: &VideoSourceDescriptor) -> Result<(u32, u32), TransportError> {
    let mut args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v:0".into(),
        "-show_entries".into(),
        "stream=width,height".into(),
        "-of".into(),
        "csv=p=0".into(),
    ];
    if let Some(format) = &descriptor.input_format {
        args.extend(["-f".into(), format.clone()]);
    }
    args.push(descriptor.source.clone());

    let output = Command::new("ffprobe")
        .args(&args)
        .output()
        .map_err(|e| open_error(descriptor, format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(open_error(descriptor, format!("ffprobe failed: {}", stderr.trim())));
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| open_error(descriptor, "Unexpected ffprobe output".to_string()))
}

/// Parse `width,height` as printed by ffprobe
fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
    let line = stdout.lines().find(|line| !line.trim().is_empty())?;
    let mut parts = line.trim().split(',');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

fn open_error(descriptor: &VideoSourceDescriptor, reason: String) -> TransportError {
    TransportError::Open {
        source_id: descriptor.id.clone(),
        reason,
    }
}

/// Build the decoder command line
fn decoder_args(descriptor: &VideoSourceDescriptor, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if descriptor.realtime {
        args.push("-re".into());
    }
    if let Some(format) = &descriptor.input_format {
        args.extend(["-f".into(), format.clone()]);
    }
    args.extend([
        "-i".into(),
        descriptor.source.clone(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", width, height),
        "-".into(),
    ]);
    args
}

/// Opens FFmpeg decoders
#[derive(Debug, Default, Clone)]
pub struct FfmpegVideoOpener;

impl VideoOpener for FfmpegVideoOpener {
    fn open(&self, descriptor: &VideoSourceDescriptor) -> Result<Box<dyn VideoTransport>, TransportError> {
        let (width, height) = match (descriptor.width, descriptor.height) {
            (Some(width), Some(height)) => (width, height),
            _ => probe_dimensions(descriptor)?,
        };

        let args = decoder_args(descriptor, width, height);
        tracing::info!("[{}] Starting FFmpeg decoder: {:?}", descriptor.id, args);

        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| open_error(descriptor, format!("Failed to start FFmpeg decoder: {}", e)))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| open_error(descriptor, "Failed to capture FFmpeg stdout".to_string()))?;

        let frame_size = (width * height * 3) as usize;
        Ok(Box::new(FfmpegVideoTransport {
            process: Some(process),
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            width,
            height,
            frame_size,
        }))
    }
}

/// A running FFmpeg decoder
pub struct FfmpegVideoTransport {
    process: Option<Child>,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_size: usize,
}

impl VideoTransport for FfmpegVideoTransport {
    fn read(&mut self) -> Result<Option<DynamicImage>, TransportError> {
        let mut buffer = vec![0u8; self.frame_size];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => RgbImage::from_raw(self.width, self.height, buffer)
                .map(|image| Some(DynamicImage::ImageRgb8(image)))
                .ok_or_else(|| TransportError::Read("Frame buffer size mismatch".to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(TransportError::Read(format!("Failed to read frame: {}", e))),
        }
    }

    fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

impl Drop for FfmpegVideoTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> VideoSourceDescriptor {
        VideoSourceDescriptor {
            id: "board".to_string(),
            source: "/dev/video0".to_string(),
            input_format: Some("v4l2".to_string()),
            width: Some(1280),
            height: Some(720),
            realtime: false,
        }
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920,1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n640,480,\n"), Some((640, 480)));
        assert_eq!(parse_dimensions("N/A,N/A"), None);
        assert_eq!(parse_dimensions(""), None);
    }

    #[test]
    fn test_decoder_args() {
        let args = decoder_args(&descriptor(), 1280, 720);
        let joined = args.join(" ");
        assert!(joined.contains("-f v4l2 -i /dev/video0"));
        assert!(joined.contains("-pix_fmt rgb24 -s 1280x720 -"));
        assert!(!joined.contains("-re"));

        let realtime = VideoSourceDescriptor {
            realtime: true,
            input_format: None,
            ..descriptor()
        };
        let args = decoder_args(&realtime, 2, 2);
        assert_eq!(args[3], "-re");
        assert_eq!(args[4], "-i");
    }
}
