use anyhow::Result;
use candle_core::Device;

#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;

/// Parsed form of a `--device` argument such as `"0,1,2,3"` or `"cpu"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Cpu,
    Cuda(Vec<usize>),
}

impl std::str::FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("cpu") {
            return Ok(Self::Cpu);
        }
        let mut ordinals = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let ordinal = part
                .parse::<usize>()
                .map_err(|_| format!("invalid device ordinal '{part}' in '{s}'"))?;
            if !ordinals.contains(&ordinal) {
                ordinals.push(ordinal);
            }
        }
        if ordinals.is_empty() {
            return Ok(Self::Cpu);
        }
        Ok(Self::Cuda(ordinals))
    }
}

/// Opens every selected CUDA device that is actually available.
///
/// Ordinals that fail to open (including every ordinal on a build without
/// the `cuda` feature) are skipped; an empty result falls back to the CPU.
pub fn resolve_devices(selector: &DeviceSelector) -> Vec<Device> {
    let mut devices = Vec::new();
    if let DeviceSelector::Cuda(ordinals) = selector {
        for &ordinal in ordinals {
            match Device::new_cuda(ordinal) {
                Ok(device) => devices.push(device),
                Err(e) => tracing::debug!("CUDA device {} unavailable: {}", ordinal, e),
            }
        }
    }
    if devices.is_empty() {
        devices.push(Device::Cpu);
    }
    devices
}

/// Returns (free_memory, total_memory) in bytes for the specified device.
/// Returns (0, 0) if CUDA is not available or disabled.
pub fn get_vram_info(_device_id: usize) -> Result<(usize, usize)> {
    #[cfg(feature = "cuda")]
    {
        match CudaDevice::new(_device_id) {
            Ok(_dev) => {
                use cudarc::driver::result::mem_get_info;
                let (free, total) = mem_get_info()?;
                Ok((free, total))
            }
            Err(e) => {
                tracing::warn!("Failed to initialize CUDA device {}: {:?}", _device_id, e);
                Ok((0, 0))
            }
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        Ok((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_lists() {
        assert_eq!("cpu".parse::<DeviceSelector>(), Ok(DeviceSelector::Cpu));
        assert_eq!("".parse::<DeviceSelector>(), Ok(DeviceSelector::Cpu));
        assert_eq!(
            "0,1, 1,3".parse::<DeviceSelector>(),
            Ok(DeviceSelector::Cuda(vec![0, 1, 3]))
        );
        assert!("0,x".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn cpu_selector_resolves_to_cpu() {
        let devices = resolve_devices(&DeviceSelector::Cpu);
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_cpu());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn vram_info_is_empty_without_cuda() -> Result<()> {
        assert_eq!(get_vram_info(0)?, (0, 0));
        Ok(())
    }
}
