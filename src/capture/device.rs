//! cpal audio transport

use super::traits::{AudioCallback, AudioSourceDescriptor, AudioStatus, AudioStream, AudioTransport, TransportError};
use crate::utils::unix_now;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};

/// Name used in configuration for the host default input
pub const DEFAULT_DEVICE: &str = "default";

/// Look up an input device by name
fn find_input_device(name: &str) -> Result<Device, TransportError> {
    let host = cpal::default_host();
    if name == DEFAULT_DEVICE {
        return host
            .default_input_device()
            .ok_or_else(|| TransportError::DeviceNotFound("No default input device".to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| TransportError::DeviceNotFound(format!("Failed to enumerate devices: {}", e)))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(TransportError::DeviceNotFound(name.to_string()))
}

/// List input device names
pub fn input_device_names() -> Vec<String> {
    match cpal::default_host().input_devices() {
        Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate audio devices: {}", e);
            Vec::new()
        }
    }
}

struct CpalStream(cpal::Stream);

impl AudioStream for CpalStream {
    fn pause(&self) -> Result<(), TransportError> {
        self.0
            .pause()
            .map_err(|e| TransportError::Stream(e.to_string()))
    }
}

/// Opens cpal input streams delivering f32 samples
#[derive(Debug, Default, Clone)]
pub struct CpalAudioTransport;

impl AudioTransport for CpalAudioTransport {
    fn open(
        &self,
        descriptor: &AudioSourceDescriptor,
        mut callback: AudioCallback,
    ) -> Result<Box<dyn AudioStream>, TransportError> {
        let device = find_input_device(&descriptor.device)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: descriptor.channels,
            sample_rate: cpal::SampleRate(descriptor.sample_rate),
            buffer_size: match descriptor.block_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        let source_id = descriptor.id.clone();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    callback(data, unix_now(), AudioStatus::default());
                },
                move |err| tracing::error!("[{}] Audio stream error: {}", source_id, err),
                None,
            )
            .map_err(|e| TransportError::Stream(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| TransportError::Stream(format!("Failed to start stream: {}", e)))?;

        tracing::info!(
            "[{}] Opened input device {} ({}Hz, {}ch)",
            descriptor.id,
            device_name,
            descriptor.sample_rate,
            descriptor.channels
        );
        Ok(Box::new(CpalStream(stream)))
    }
}
