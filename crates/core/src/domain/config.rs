//! Configuration management for Cascade
//!
//! This module provides:
//! - Configuration structs for the audio stream, the filter bank and the
//!   control surface
//! - Preset system storing control settings as TOML
//! - A config manager that falls back to factory defaults

use crate::domain::audio::{AudioError, StreamConfig};
use crate::domain::chain::FilterBank;
use crate::domain::control::{ControlSnapshot, SlotId};
use crate::domain::design::{Cutoff, FilterSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),
}

impl From<AudioError> for ConfigError {
    fn from(err: AudioError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Preset directory, relative paths resolve against the config directory
    pub preset_dir: PathBuf,

    /// How often the CLI drains engine events, in milliseconds
    pub event_poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preset_dir: PathBuf::from("presets"),
            event_poll_interval_ms: 100,
        }
    }
}

/// Audio device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDeviceConfig {
    /// Input device name (empty = use default)
    pub input_device: String,

    /// Output device name (empty = use default)
    pub output_device: String,

    pub sample_rate: u32,

    /// Samples per engine block
    pub block_size: usize,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            input_device: String::new(),
            output_device: String::new(),
            sample_rate: StreamConfig::DEFAULT_SAMPLE_RATE,
            block_size: StreamConfig::DEFAULT_BLOCK_SIZE,
        }
    }
}

impl AudioDeviceConfig {
    pub fn stream_config(&self) -> Result<StreamConfig> {
        Ok(StreamConfig::new(self.sample_rate, self.block_size)?)
    }

    pub fn input_device(&self) -> Option<&str> {
        Some(self.input_device.as_str()).filter(|s| !s.is_empty())
    }

    pub fn output_device(&self) -> Option<&str> {
        Some(self.output_device.as_str()).filter(|s| !s.is_empty())
    }
}

/// Single-cutoff design parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutoffConfig {
    pub order: u32,
    pub cutoff_hz: f32,
}

/// Band design parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub order: u32,
    pub low_hz: f32,
    pub high_hz: f32,
}

/// Filter bank configuration; the custom slot is always a lowpass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterBankConfig {
    pub lowpass: CutoffConfig,
    pub highpass: CutoffConfig,
    pub bandpass: BandConfig,
    pub bandstop: BandConfig,
    pub custom: CutoffConfig,
}

impl Default for FilterBankConfig {
    fn default() -> Self {
        Self::from(&FilterBank::defaults(StreamConfig::DEFAULT_SAMPLE_RATE as f32))
    }
}

impl From<&FilterBank> for FilterBankConfig {
    fn from(bank: &FilterBank) -> Self {
        let single = |spec: &FilterSpec| CutoffConfig {
            order: spec.order,
            cutoff_hz: spec.primary_cutoff(),
        };
        let band = |spec: &FilterSpec| match spec.cutoff {
            Cutoff::Band { low, high } => BandConfig {
                order: spec.order,
                low_hz: low,
                high_hz: high,
            },
            Cutoff::Single(hz) => BandConfig {
                order: spec.order,
                low_hz: hz,
                high_hz: hz,
            },
        };
        Self {
            lowpass: single(&bank.lowpass),
            highpass: single(&bank.highpass),
            bandpass: band(&bank.bandpass),
            bandstop: band(&bank.bandstop),
            custom: single(&bank.custom),
        }
    }
}

impl FilterBankConfig {
    /// Build a validated bank for `sample_rate`
    pub fn to_bank(&self, sample_rate: u32) -> Result<FilterBank> {
        let fs = sample_rate as f32;
        let bank = FilterBank {
            lowpass: FilterSpec::lowpass(self.lowpass.order, self.lowpass.cutoff_hz, fs),
            highpass: FilterSpec::highpass(self.highpass.order, self.highpass.cutoff_hz, fs),
            bandpass: FilterSpec::bandpass(
                self.bandpass.order,
                self.bandpass.low_hz,
                self.bandpass.high_hz,
                fs,
            ),
            bandstop: FilterSpec::bandstop(
                self.bandstop.order,
                self.bandstop.low_hz,
                self.bandstop.high_hz,
                fs,
            ),
            custom: FilterSpec::lowpass(self.custom.order, self.custom.cutoff_hz, fs),
        };
        bank.validate()?;
        Ok(bank)
    }
}

/// Control-surface state, also the content of a preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub lowpass: bool,
    pub highpass: bool,
    pub bandpass: bool,
    pub bandstop: bool,
    pub custom: bool,
    pub custom_cutoff_hz: f32,
    pub gain: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::from(&ControlSnapshot::default())
    }
}

impl From<&ControlSnapshot> for ControlConfig {
    fn from(snapshot: &ControlSnapshot) -> Self {
        Self {
            lowpass: snapshot.is_enabled(SlotId::Low),
            highpass: snapshot.is_enabled(SlotId::High),
            bandpass: snapshot.is_enabled(SlotId::BandPass),
            bandstop: snapshot.is_enabled(SlotId::BandStop),
            custom: snapshot.is_enabled(SlotId::Custom),
            custom_cutoff_hz: snapshot.custom_cutoff_hz(),
            gain: snapshot.gain(),
        }
    }
}

impl ControlConfig {
    /// Out-of-range values are clamped, not rejected
    pub fn to_snapshot(&self) -> ControlSnapshot {
        ControlSnapshot::new(
            [
                self.lowpass,
                self.highpass,
                self.bandpass,
                self.bandstop,
                self.custom,
            ],
            self.custom_cutoff_hz,
            self.gain,
        )
    }
}

/// Complete Cascade configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EqualizerConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub audio: AudioDeviceConfig,
    #[serde(default)]
    pub filters: FilterBankConfig,
    #[serde(default)]
    pub controls: ControlConfig,
}

impl EqualizerConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Stream parameters and filter bank, both validated
    pub fn resolve(&self) -> Result<(StreamConfig, FilterBank)> {
        let stream = self.audio.stream_config()?;
        let bank = self.filters.to_bank(stream.sample_rate.hz())?;
        Ok((stream, bank))
    }

    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }
}

/// Preset manager for named control settings
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    /// Create a new preset manager
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    /// Names stay inside the preset directory
    fn preset_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("invalid preset name '{name}'")));
        }
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// List all available presets
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        if !self.preset_dir.exists() {
            return Ok(presets);
        }

        let mut entries = fs::read_dir(&self.preset_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    /// Load a preset by name
    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<ControlConfig> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let controls: ControlConfig = toml::from_str(&contents)?;
        info!(name, "Preset loaded");
        Ok(controls)
    }

    /// Save a preset by name
    #[instrument(skip(self, controls))]
    pub async fn save_preset(&self, name: &str, controls: &ControlConfig) -> Result<()> {
        let path = self.preset_path(name)?;
        fs::create_dir_all(&self.preset_dir).await?;
        let toml_str = toml::to_string_pretty(controls)?;
        fs::write(path, toml_str).await?;
        info!(name, "Preset saved");
        Ok(())
    }

    /// Delete a preset by name
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    /// Check if a preset exists
    pub async fn preset_exists(&self, name: &str) -> bool {
        self.preset_path(name).is_ok_and(|path| path.exists())
    }
}

/// Configuration manager for the main Cascade config
///
/// Manages the main configuration file at `~/.config/cascade/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager rooted at `config_dir`
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/cascade` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("cascade"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Preset manager for the configured preset directory
    pub fn presets(&self, config: &EqualizerConfig) -> PresetManager {
        let dir = if config.app.preset_dir.is_absolute() {
            config.app.preset_dir.clone()
        } else {
            self.config_dir.join(&config.app.preset_dir)
        };
        PresetManager::new(dir)
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, returns factory default.
    /// If the config file is corrupt or invalid, logs an error and returns
    /// factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EqualizerConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EqualizerConfig::factory_default();

            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        let loaded = match EqualizerConfig::load_from_file(&self.config_path).await {
            Ok(config) => config.validate().map(|_| config),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(config) => {
                info!(
                    path = %self.config_path.display(),
                    "Configuration loaded successfully"
                );
                config
            }
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EqualizerConfig::factory_default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EqualizerConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Clear configuration (delete config file)
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(
                path = %self.config_path.display(),
                "Configuration cleared"
            );
        }

        Ok(())
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
