//! Audio domain types shared by every layer
//!
//! This module defines the error kinds of the equalizer, the stream
//! parameters the engine is built for, and the platform-agnostic device
//! enumeration interface. Implementations for specific platforms live in
//! the `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    /// Filter parameters rejected at design time
    #[error("Invalid filter spec: {0}")]
    InvalidSpec(String),

    /// Capture or output device unavailable
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Unreadable or corrupt input file
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Export file could not be written
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// Failure contained inside the real-time path
    #[error("Runtime fault: {0}")]
    RuntimeFault(String),

    /// Request conflicts with the currently active source
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid stream or engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz22050,
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            22050 => SampleRate::Hz22050,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Half the sample rate
    pub fn nyquist(&self) -> f32 {
        self.hz() as f32 / 2.0
    }
}

/// Configuration of the mono f32 stream the engine runs on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: SampleRate,
    /// Samples per callback block
    pub block_size: usize,
}

impl StreamConfig {
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
    pub const DEFAULT_BLOCK_SIZE: usize = 1024;
    pub const MAX_BLOCK_SIZE: usize = 16384;

    /// The engine only processes a single channel
    pub const CHANNELS: u16 = 1;

    pub fn new(sample_rate: u32, block_size: usize) -> Result<Self> {
        let config = Self {
            sample_rate: SampleRate::from_hz(sample_rate),
            block_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate.hz() < 8000 {
            return Err(AudioError::InvalidConfiguration(format!(
                "sample rate {} Hz is too low",
                self.sample_rate.hz()
            )));
        }
        if self.block_size == 0 || self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidConfiguration(format!(
                "block size {} outside 1..={}",
                self.block_size,
                Self::MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }

    /// Nominal duration of one block in seconds
    pub fn block_duration_secs(&self) -> f64 {
        self.block_size as f64 / self.sample_rate.hz() as f64
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Type of audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
    Duplex,
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub sample_rates: Vec<SampleRate>,
    pub max_channels: u16,
    pub default_sample_rate: Option<SampleRate>,
}

impl DeviceInfo {
    pub fn supports_rate(&self, rate: SampleRate) -> bool {
        self.sample_rates.iter().any(|sr| sr.hz() == rate.hz())
    }
}

/// Trait for enumerating available audio devices
pub trait AudioEnumerator: Send + Sync {
    /// List all available audio devices
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get all input devices
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get all output devices
    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get the default input device
    fn default_input_device(&self) -> Result<DeviceInfo>;

    /// Get the default output device
    fn default_output_device(&self) -> Result<DeviceInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversion() {
        assert_eq!(SampleRate::Hz44100.hz(), 44100);
        assert_eq!(SampleRate::from_hz(22050), SampleRate::Hz22050);
        assert_eq!(SampleRate::Custom(16000).hz(), 16000);
        assert_eq!(SampleRate::Hz44100.nyquist(), 22050.0);
    }

    #[test]
    fn test_device_id() {
        let id = DeviceId::new("test-device".to_string());
        assert_eq!(id.as_str(), "test-device");
    }

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.sample_rate.hz(), 44100);
        assert_eq!(config.block_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stream_config_rejects_bad_values() {
        assert!(matches!(
            StreamConfig::new(44100, 0),
            Err(AudioError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            StreamConfig::new(100, 1024),
            Err(AudioError::InvalidConfiguration(_))
        ));
        assert!(StreamConfig::new(48000, 2048).is_ok());
    }

    #[test]
    fn test_block_duration() {
        let config = StreamConfig::new(44100, 1024).unwrap();
        assert!((config.block_duration_secs() - 0.02322).abs() < 1e-4);
    }
}
