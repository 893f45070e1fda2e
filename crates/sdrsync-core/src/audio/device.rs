//! Audio device enumeration and lookup
//!
//! Devices are enumerated from every available host so a configuration can
//! name, for example, an ALSA capture card for the radio and a PulseAudio
//! monitor source for the WebSDR audio.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Capture or playback side of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "audio input",
            Direction::Output => "audio output",
        }
    }
}

/// Human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|&host_id| host_name(host_id) == name)
        .and_then(|host_id| cpal::host_from_id(host_id).ok())
}

fn host_devices(host: &Host, direction: Direction) -> Option<Vec<cpal::Device>> {
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    match devices {
        Ok(devices) => Some(devices),
        Err(e) => {
            log::debug!("Could not enumerate {} devices: {}", direction.label(), e);
            None
        }
    }
}

fn default_for(host: &Host, direction: Direction) -> Option<cpal::Device> {
    match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
}

/// Information about one audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Identifier for configuration (includes host info)
    pub id: DeviceId,
    pub name: String,
    /// Host backend name (e.g., "ALSA", "WASAPI")
    pub host: String,
    /// Whether this is the default device of its host
    pub is_default: bool,
    /// Common sample rates the device supports
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)
    }
}

/// All devices of one direction from all hosts, defaults first
pub fn list_devices(direction: Direction) -> AudioResult<Vec<AudioDevice>> {
    let mut all_devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = default_for(&host, direction).and_then(|d| d.name().ok());

        let Some(devices) = host_devices(&host, direction) else {
            continue;
        };

        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let ranges: Vec<(u32, u32, u16)> = match direction {
                Direction::Input => device.supported_input_configs().map(|c| {
                    c.map(|r| (r.min_sample_rate().0, r.max_sample_rate().0, r.channels()))
                        .collect()
                }),
                Direction::Output => device.supported_output_configs().map(|c| {
                    c.map(|r| (r.min_sample_rate().0, r.max_sample_rate().0, r.channels()))
                        .collect()
                }),
            }
            .unwrap_or_default();
            if ranges.is_empty() {
                continue;
            }

            let mut sample_rates = Vec::new();
            let mut max_channels = 0;
            for &(min, max, channels) in &ranges {
                max_channels = max_channels.max(channels);
                for rate in [8000, 12000, 16000, 22050, 44100, 48000, 96000] {
                    if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            all_devices.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if all_devices.is_empty() {
        return Err(AudioError::NoDevices(direction.label()));
    }

    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!("Enumerated {} {} devices", all_devices.len(), direction.label());
    Ok(all_devices)
}

/// Find a device by its ID.
///
/// Uses the host named in the ID if available, otherwise searches all hosts.
pub fn find_device(id: &DeviceId, direction: Direction) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name);

    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return host_devices(&host, direction)
            .and_then(|devices| devices.into_iter().find(matches))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| host_devices(&host, direction))
        .flatten()
        .find(matches)
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

/// Resolve an optional configured device, falling back to the default host's
/// default device
pub fn resolve_device(id: Option<&DeviceId>, direction: Direction) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device(id, direction),
        None => default_for(&cpal::default_host(), direction).ok_or_else(|| {
            AudioError::NoDefaultDevice(format!("no default {} device", direction.label()))
        }),
    }
}
