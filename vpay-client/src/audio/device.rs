use crate::audio::error::{AudioError, AudioResult};
use crate::audio::source::CaptureConstraints;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleRate, SupportedStreamConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Device identifier (unique name)
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Whether this is the default input device
    pub is_default: bool,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
}

/// List all available input devices
///
/// # Errors
/// Returns `AudioError::DeviceUnavailable` if no input devices are found.
/// Returns `AudioError::CpalError` if there's an error accessing devices.
///
/// # Example
/// ```no_run
/// use vpay_lib::audio::device::list_input_devices;
///
/// let devices = list_input_devices().unwrap();
/// for device in devices {
///     println!("Device: {} ({})", device.name, device.id);
/// }
/// ```
pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices: Vec<Device> = host.input_devices()?.collect();

    if devices.is_empty() {
        return Err(AudioError::DeviceUnavailable(
            "no input devices found".to_string(),
        ));
    }

    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut audio_devices = Vec::with_capacity(devices.len());
    for device in devices {
        let name = device.name().map_err(|_| AudioError::InvalidDeviceName)?;
        let is_default = default_name.as_deref() == Some(name.as_str());

        audio_devices.push(AudioDevice {
            id: name.clone(),
            sample_rates: get_supported_sample_rates(&device),
            name,
            is_default,
        });
    }

    Ok(audio_devices)
}

/// Get the default input device
///
/// # Errors
/// Returns `AudioError::DeviceUnavailable` if the host has no default input device.
pub fn get_default_input_device() -> AudioResult<AudioDevice> {
    let host = cpal::default_host();
    let device = default_device(&host)?;
    let name = device.name().map_err(|_| AudioError::InvalidDeviceName)?;

    Ok(AudioDevice {
        id: name.clone(),
        name,
        is_default: true,
        sample_rates: get_supported_sample_rates(&device),
    })
}

/// Resolve the device named by the constraints, or the host default
pub(crate) fn resolve_device(host: &Host, device_id: Option<&str>) -> AudioResult<Device> {
    match device_id {
        Some(id) => find_device_by_id(host, id),
        None => default_device(host),
    }
}

fn default_device(host: &Host) -> AudioResult<Device> {
    host.default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))
}

/// Find a device by its ID (name)
pub(crate) fn find_device_by_id(host: &Host, device_id: &str) -> AudioResult<Device> {
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    for device in devices {
        if device.name().is_ok_and(|name| name == device_id) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceUnavailable(format!(
        "input device '{device_id}' not found"
    )))
}

/// Pick the stream configuration closest to the requested constraints
///
/// Preference order: a range with the requested channel count that covers
/// the target rate, then any range covering the target rate, then the
/// device default. Anything other than the target format is downmixed and
/// resampled by the collector.
pub(crate) fn select_stream_config(
    device: &Device,
    constraints: &CaptureConstraints,
) -> AudioResult<SupportedStreamConfig> {
    let target = SampleRate(constraints.sample_rate);
    let ranges: Vec<_> = device.supported_input_configs()?.collect();

    let covers = |r: &&cpal::SupportedStreamConfigRange| {
        r.min_sample_rate() <= target && r.max_sample_rate() >= target
    };

    let chosen = ranges
        .iter()
        .filter(covers)
        .find(|r| r.channels() == constraints.channel_count)
        .or_else(|| ranges.iter().find(covers));

    let config = match chosen {
        Some(range) => range.clone().with_sample_rate(target),
        None => device.default_input_config()?,
    };

    debug!(
        sample_rate = config.sample_rate().0,
        channels = config.channels(),
        format = ?config.sample_format(),
        "Selected input stream config"
    );

    Ok(config)
}

/// Get supported sample rates for a device
fn get_supported_sample_rates(device: &Device) -> Vec<u32> {
    const COMMON_RATES: [u32; 7] = [8000, 16000, 22050, 32000, 44100, 48000, 96000];

    let mut rates = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            for &rate in &COMMON_RATES {
                let sample_rate = SampleRate(rate);
                if sample_rate >= config.min_sample_rate()
                    && sample_rate <= config.max_sample_rate()
                    && !rates.contains(&rate)
                {
                    rates.push(rate);
                }
            }
        }
    }

    if rates.is_empty() {
        if let Ok(config) = device.default_input_config() {
            rates.push(config.sample_rate().0);
        }
    }

    rates.sort_unstable();
    rates
}
