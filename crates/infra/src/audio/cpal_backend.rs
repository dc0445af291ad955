//! CPAL-based device enumeration
//!
//! Provides a cross-platform view of the audio devices using the CPAL
//! library, and the device lookup the duplex stream opens against.

use cascade_core::domain::audio::{
    AudioEnumerator, AudioError, DeviceId, DeviceInfo, DeviceType, Result, SampleRate,
};
use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use tracing::{debug, info, warn};

/// Which side of a duplex stream a device is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Input,
    Output,
}

/// CPAL-based audio device wrapper
pub struct CpalDevice {
    info: DeviceInfo,
    cpal_device: cpal::Device,
}

impl CpalDevice {
    pub fn new(cpal_device: cpal::Device, device_type: DeviceType) -> Self {
        let name = device_name(&cpal_device);

        let mut sample_rates = Vec::new();
        let mut max_channels = 0u16;

        let input_ranges = cpal_device
            .supported_input_configs()
            .map(|configs| configs.collect::<Vec<_>>())
            .unwrap_or_default();
        let output_ranges = cpal_device
            .supported_output_configs()
            .map(|configs| configs.collect::<Vec<_>>())
            .unwrap_or_default();

        for range in input_ranges.iter().chain(output_ranges.iter()) {
            max_channels = max_channels.max(range.channels());

            // Report the common rates a range covers plus its own bounds
            for hz in [22050, 44100, 48000, 96000] {
                if range.min_sample_rate() <= hz && hz <= range.max_sample_rate() {
                    sample_rates.push(SampleRate::from_hz(hz));
                }
            }
            sample_rates.push(SampleRate::from_hz(range.min_sample_rate()));
            sample_rates.push(SampleRate::from_hz(range.max_sample_rate()));
        }

        sample_rates.sort_by_key(|sr| sr.hz());
        sample_rates.dedup_by_key(|sr| sr.hz());

        let default_config = match device_type {
            DeviceType::Output => cpal_device.default_output_config(),
            _ => cpal_device
                .default_input_config()
                .or_else(|_| cpal_device.default_output_config()),
        };
        let default_sample_rate = default_config
            .ok()
            .map(|config| SampleRate::from_hz(config.sample_rate()));

        let info = DeviceInfo {
            id: DeviceId::new(name.clone()),
            name,
            device_type,
            sample_rates,
            max_channels,
            default_sample_rate,
        };

        debug!("Created device: {}", info.name);

        Self { info, cpal_device }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn into_inner(self) -> cpal::Device {
        self.cpal_device
    }
}

impl fmt::Debug for CpalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalDevice")
            .field("info", &self.info)
            .finish()
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

/// Open a device by name, or the host default when `name` is `None`
pub fn find_device(host: &cpal::Host, role: DeviceRole, name: Option<&str>) -> Result<cpal::Device> {
    match name {
        None => {
            let device = match role {
                DeviceRole::Input => host.default_input_device(),
                DeviceRole::Output => host.default_output_device(),
            };
            device.ok_or_else(|| {
                AudioError::DeviceError(format!("No default {:?} device", role).to_lowercase())
            })
        }
        Some(wanted) => {
            let mut devices = match role {
                DeviceRole::Input => host.input_devices(),
                DeviceRole::Output => host.output_devices(),
            }
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

            devices
                .find(|d| device_name(d) == wanted)
                .ok_or_else(|| AudioError::DeviceError(format!("Device not found: {wanted}")))
        }
    }
}

/// CPAL-based audio enumerator
pub struct CpalEnumerator {
    host: cpal::Host,
}

impl Default for CpalEnumerator {
    fn default() -> Self {
        info!("Initializing CPAL enumerator");
        Self::new()
    }
}

impl CpalEnumerator {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    pub fn host(&self) -> &cpal::Host {
        &self.host
    }

    /// Classify a device by the directions it accepts configurations for
    fn determine_device_type(&self, device: &cpal::Device) -> Option<DeviceType> {
        let has_input = device
            .supported_input_configs()
            .map(|mut configs| configs.next().is_some())
            .unwrap_or(false);
        let has_output = device
            .supported_output_configs()
            .map(|mut configs| configs.next().is_some())
            .unwrap_or(false);

        match (has_input, has_output) {
            (true, true) => Some(DeviceType::Duplex),
            (true, false) => Some(DeviceType::Input),
            (false, true) => Some(DeviceType::Output),
            (false, false) => None,
        }
    }
}

impl AudioEnumerator for CpalEnumerator {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        info!("Enumerating all audio devices");

        let cpal_devices = self
            .host
            .devices()
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        let mut devices = Vec::new();
        for device in cpal_devices {
            match self.determine_device_type(&device) {
                Some(device_type) => {
                    let device = CpalDevice::new(device, device_type);
                    debug!("Found device: {}", device.info().name);
                    devices.push(device.info().clone());
                }
                None => warn!("Skipping device without inputs or outputs: {}", device_name(&device)),
            }
        }

        info!("Found {} audio devices", devices.len());
        Ok(devices)
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        let all_devices = self.devices()?;
        Ok(all_devices
            .into_iter()
            .filter(|d| matches!(d.device_type, DeviceType::Input | DeviceType::Duplex))
            .collect())
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let all_devices = self.devices()?;
        Ok(all_devices
            .into_iter()
            .filter(|d| matches!(d.device_type, DeviceType::Output | DeviceType::Duplex))
            .collect())
    }

    fn default_input_device(&self) -> Result<DeviceInfo> {
        let device = find_device(&self.host, DeviceRole::Input, None)?;
        Ok(CpalDevice::new(device, DeviceType::Input).info().clone())
    }

    fn default_output_device(&self) -> Result<DeviceInfo> {
        let device = find_device(&self.host, DeviceRole::Output, None)?;
        Ok(CpalDevice::new(device, DeviceType::Output).info().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerator_creation() {
        let enumerator = CpalEnumerator::default();
        assert_eq!(enumerator.host().id(), cpal::default_host().id());
    }

    #[test]
    fn test_enumerate_devices() {
        let enumerator = CpalEnumerator::default();
        match enumerator.devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.name.is_empty());
                    assert!(device.sample_rates.windows(2).all(|w| w[0].hz() < w[1].hz()));
                }
            }
            Err(e) => {
                // On CI or headless systems, there might not be audio devices
                eprintln!("Skipping test: {}", e);
            }
        }
    }

    #[test]
    fn test_unknown_device_is_device_error() {
        let host = cpal::default_host();
        match find_device(&host, DeviceRole::Output, Some("no-such-device-\u{1F50A}")) {
            Err(AudioError::DeviceError(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("found a device that should not exist"),
        }
    }
}
