//! Microphone capture stream delivering mono blocks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, Device, FromSample, SampleFormat, StreamConfig};
use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{error, info, warn};

/// Capture could not be opened. Never retried automatically.
#[derive(Debug, Error)]
pub enum AudioInputError {
    #[error("No audio input devices found")]
    NoDevices,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Input device unavailable (disconnected or permission denied)")]
    Unavailable,
    #[error("Failed to get input config: {0}")]
    ConfigError(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to build input stream: {0}")]
    StreamError(String),
}

impl From<DefaultStreamConfigError> for AudioInputError {
    fn from(err: DefaultStreamConfigError) -> Self {
        match err {
            DefaultStreamConfigError::DeviceNotAvailable => Self::Unavailable,
            other => Self::ConfigError(other.to_string()),
        }
    }
}

impl From<BuildStreamError> for AudioInputError {
    fn from(err: BuildStreamError) -> Self {
        match err {
            BuildStreamError::DeviceNotAvailable => Self::Unavailable,
            other => Self::StreamError(other.to_string()),
        }
    }
}

/// Input device description
#[derive(Debug, Clone)]
pub struct InputDevice {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

/// List capture devices with their default configs
pub fn list_input_devices() -> Result<Vec<InputDevice>, AudioInputError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices: Vec<_> = host
        .input_devices()
        .map_err(|e| AudioInputError::ConfigError(e.to_string()))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(InputDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
                name,
            })
        })
        .collect();

    if devices.is_empty() {
        return Err(AudioInputError::NoDevices);
    }
    Ok(devices)
}

fn find_device(device_id: &str) -> Result<Device, AudioInputError> {
    let host = cpal::default_host();
    if device_id == "default" {
        return host.default_input_device().ok_or(AudioInputError::NoDevices);
    }

    host.input_devices()
        .map_err(|e| AudioInputError::ConfigError(e.to_string()))?
        .find(|device| device.name().is_ok_and(|name| name == device_id))
        .ok_or_else(|| AudioInputError::DeviceNotFound(device_id.to_string()))
}

/// Running capture stream. Dropping it closes the device and the block channel.
pub struct InputStream {
    sample_rate: u32,
    channels: u16,
    dropped_blocks: Arc<AtomicU64>,
    _stream: cpal::Stream,
}

impl InputStream {
    /// Open `device_id` ("default" for the system default) and send every
    /// callback's samples, downmixed to mono, on `blocks`
    pub fn open(device_id: &str, blocks: Sender<Vec<f32>>) -> Result<Self, AudioInputError> {
        let device = find_device(device_id)?;
        let config = device.default_input_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let stream_config: StreamConfig = config.clone().into();
        let dropped_blocks = Arc::new(AtomicU64::new(0));

        let stream = match config.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32>(&device, &stream_config, blocks, dropped_blocks.clone()),
            SampleFormat::I16 => build_mono_stream::<i16>(&device, &stream_config, blocks, dropped_blocks.clone()),
            SampleFormat::I32 => build_mono_stream::<i32>(&device, &stream_config, blocks, dropped_blocks.clone()),
            format => return Err(AudioInputError::UnsupportedFormat(format!("{format:?}"))),
        }?;

        stream.play().map_err(|e| AudioInputError::StreamError(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "Audio input stream opened"
        );

        Ok(Self {
            sample_rate,
            channels,
            dropped_blocks,
            _stream: stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Blocks discarded because the consumer fell behind
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }
}

fn build_mono_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioInputError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| frame.iter().map(|s| f32::from_sample_(*s)).sum::<f32>() / channels as f32)
                .collect();
            // Never block the device callback; a slow consumer loses blocks
            if tx.try_send(mono).is_err() && dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("Capture consumer fell behind, dropping input blocks");
            }
        },
        |err| error!("Input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
