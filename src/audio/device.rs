//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};

use super::error::AudioError;

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Display name, also used to select the device
    pub name: String,
    /// Common sample rates (Hz) inside the device's supported ranges
    pub supported_sample_rates: Vec<u32>,
    pub supported_channels: Vec<u16>,
    pub is_default: bool,
}

/// List available input (capture) devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let (supported_sample_rates, supported_channels) = input_capabilities(&device);
            Some(AudioDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
                supported_sample_rates,
                supported_channels,
            })
        })
        .collect())
}

/// Find an input device by name, or the host default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".into())),
    }
}

/// Find an output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".into())),
    }
}

fn input_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in device.supported_input_configs().into_iter().flatten() {
        for rate in [8000u32, 16000, 44100, 48000] {
            if rate >= config.min_sample_rate().0
                && rate <= config.max_sample_rate().0
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Availability depends on the host; enumeration must not panic
        let _ = list_input_devices();
    }

    #[test]
    fn test_unknown_device_name() {
        let err = find_input_device(Some("no-such-device-bubblevoice")).err().unwrap();
        assert!(matches!(
            err,
            AudioError::DeviceNotFound(_) | AudioError::DeviceOpenFailed(_)
        ));

        let err = find_output_device(Some("no-such-device-bubblevoice")).err().unwrap();
        assert!(matches!(
            err,
            AudioError::DeviceNotFound(_) | AudioError::DeviceOpenFailed(_)
        ));
    }
}
