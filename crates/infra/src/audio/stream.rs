//! Duplex audio stream driving the real-time engine
//!
//! The output callback is the engine's block clock. Capture samples travel
//! from the input callback through the lock-free ring, so the two callbacks
//! never share a lock. Devices with more than one channel are downmixed on
//! input and the mono result is copied to every output channel.

use super::cpal_backend::{find_device, DeviceRole};
use super::lockfree_buffer::{ring_buffer, RingConsumer, RingProducer};
use cascade_core::domain::audio::{AudioError, Result, StreamConfig};
use cascade_core::domain::engine::AudioEngine;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig as CpalStreamConfig};
use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

/// Blocks of capture kept in flight before the oldest are discarded
const CAPTURE_BLOCKS: usize = 4;

/// Stream errors buffered for the control side
const ERROR_CAPACITY: usize = 16;

/// Devices a duplex stream opens, `None` meaning the host default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Running duplex stream; dropping it stops both callbacks
pub struct DuplexStream {
    input: Option<Stream>,
    _output: Stream,
    config: StreamConfig,
    output_channels: u16,
    errors: Receiver<String>,
}

impl DuplexStream {
    /// Open the devices and move `engine` into the output callback
    ///
    /// A missing input device is not fatal: the stream runs output-only and
    /// [`DuplexStream::has_input`] reports it.
    pub fn open(engine: AudioEngine, devices: &DeviceSelection) -> Result<Self> {
        let config = *engine.config();
        let host = cpal::default_host();
        info!(
            "Opening duplex stream on {:?}: {} Hz, block {}",
            host.id(),
            config.sample_rate.hz(),
            config.block_size
        );

        let (error_tx, errors) = bounded(ERROR_CAPACITY);
        let (producer, consumer) = ring_buffer(config.block_size * CAPTURE_BLOCKS);

        let input = match find_device(&host, DeviceRole::Input, devices.input.as_deref()) {
            Ok(device) => match build_input(&device, &config, producer, error_tx.clone()) {
                Ok(stream) => Some(stream),
                Err(e) if devices.input.is_none() => {
                    warn!("Capture unavailable: {}", e);
                    None
                }
                Err(e) => return Err(e),
            },
            Err(e) if devices.input.is_none() => {
                warn!("Capture unavailable: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let output_device = find_device(&host, DeviceRole::Output, devices.output.as_deref())?;
        let output_channels = device_channels(&output_device, DeviceRole::Output);
        let output = build_output(&output_device, &config, output_channels, engine, consumer, error_tx)?;

        if let Some(stream) = &input {
            stream
                .play()
                .map_err(|e| AudioError::DeviceError(format!("Failed to start input: {}", e)))?;
        }
        output
            .play()
            .map_err(|e| AudioError::DeviceError(format!("Failed to start output: {}", e)))?;

        info!(
            "Duplex stream running ({} output channels, capture {})",
            output_channels,
            if input.is_some() { "available" } else { "unavailable" }
        );

        Ok(Self {
            input,
            _output: output,
            config,
            output_channels,
            errors,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    /// Drain errors reported by the driver since the last call
    pub fn poll_errors(&self) -> Vec<String> {
        self.errors.try_iter().collect()
    }
}

fn device_channels(device: &cpal::Device, role: DeviceRole) -> u16 {
    let config = match role {
        DeviceRole::Input => device.default_input_config(),
        DeviceRole::Output => device.default_output_config(),
    };
    config.map(|c| c.channels()).unwrap_or(StreamConfig::CHANNELS).max(1)
}

fn cpal_config(config: &StreamConfig, channels: u16, buffer_size: BufferSize) -> CpalStreamConfig {
    CpalStreamConfig {
        channels,
        sample_rate: config.sample_rate.hz(),
        buffer_size,
    }
}

fn fixed_buffer(config: &StreamConfig) -> BufferSize {
    BufferSize::Fixed(config.block_size as u32)
}

/// Fixed block size when the device accepts it, the driver default otherwise
///
/// The engine chunks whatever the driver hands it, so the default is safe.
fn buffer_size(device: &cpal::Device, role: DeviceRole, config: &StreamConfig) -> BufferSize {
    let supported = match role {
        DeviceRole::Input => device.default_input_config(),
        DeviceRole::Output => device.default_output_config(),
    };
    let block = config.block_size as u32;
    let accepted = match &supported {
        Ok(c) => match c.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => (*min..=*max).contains(&block),
            cpal::SupportedBufferSize::Unknown => false,
        },
        Err(_) => false,
    };
    if accepted {
        fixed_buffer(config)
    } else {
        warn!("{:?} device does not accept {} sample buffers, using its default", role, block);
        BufferSize::Default
    }
}

fn report(errors: &Sender<String>, context: &'static str) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let errors = errors.clone();
    move |err| {
        error!("{} stream error: {}", context, err);
        let _ = errors.try_send(format!("{context}: {err}"));
    }
}

fn build_input(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: RingProducer,
    errors: Sender<String>,
) -> Result<Stream> {
    let channels = device_channels(device, DeviceRole::Input);
    let channel_count = channels as usize;
    let mut mono = vec![0.0f32; config.block_size];

    device
        .build_input_stream(
            &cpal_config(config, channels, buffer_size(device, DeviceRole::Input, config)),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frames in data.chunks(mono.len() * channel_count) {
                    let count = frames.len() / channel_count;
                    for (dst, frame) in mono[..count].iter_mut().zip(frames.chunks_exact(channel_count)) {
                        *dst = frame.iter().sum::<f32>() / channel_count as f32;
                    }
                    // Overflow drops the newest samples; the output side trims latency
                    producer.write(&mono[..count]);
                }
            },
            report(&errors, "Input"),
            None,
        )
        .map_err(|e| AudioError::DeviceError(format!("Failed to build input stream: {}", e)))
}

fn build_output(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: u16,
    mut engine: AudioEngine,
    mut consumer: RingConsumer,
    errors: Sender<String>,
) -> Result<Stream> {
    let channel_count = channels as usize;
    let block_size = config.block_size;
    let mut captured = vec![0.0f32; block_size];
    let mut mono = vec![0.0f32; block_size];

    device
        .build_output_stream(
            &cpal_config(config, channels, buffer_size(device, DeviceRole::Output, config)),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frames in data.chunks_mut(block_size * channel_count) {
                    let count = frames.len() / channel_count;
                    consumer.discard_excess(block_size * (CAPTURE_BLOCKS - 1));
                    let read = consumer.read(&mut captured[..count]);
                    engine.process(&captured[..read], &mut mono[..count]);
                    for (frame, &sample) in frames.chunks_exact_mut(channel_count).zip(&mono[..count]) {
                        frame.fill(sample);
                    }
                }
            },
            report(&errors, "Output"),
            None,
        )
        .map_err(|e| AudioError::DeviceError(format!("Failed to build output stream: {}", e)))
}
