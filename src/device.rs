//! # Compute Device Selection
//!
//! Picks the device the acoustic model runs on. `auto` probes CUDA, then
//! Metal, then settles on the CPU; an explicit GPU preference falls back to
//! the CPU when the hardware is missing rather than failing startup.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info};

static DETECTED: OnceLock<Device> = OnceLock::new();

/// Operator preference for where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference to a concrete device, falling back to CPU.
pub fn select(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => best_available().clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal().unwrap_or(Device::Cpu),
    }
}

fn best_available() -> &'static Device {
    DETECTED.get_or_init(|| {
        if let Some(device) = cuda() {
            info!("selected CUDA for inference");
            return device;
        }
        if let Some(device) = metal() {
            info!("selected Metal for inference");
            return device;
        }
        info!("no GPU available, running inference on the CPU");
        Device::Cpu
    })
}

fn cuda() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA unavailable: {}", e);
            None
        }
    }
}

fn metal() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>(), Ok(DevicePreference::Auto));
        assert_eq!("CPU".parse::<DevicePreference>(), Ok(DevicePreference::Cpu));
        assert_eq!("gpu".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_preference_never_falls_back() {
        assert!(matches!(select(DevicePreference::Cpu), Device::Cpu));
    }
}
