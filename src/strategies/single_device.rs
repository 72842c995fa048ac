use crate::accelerators::{Device, DeviceType};
use crate::strategies::{Strategy, StrategyCore, StrategyFamily};

/// Everything runs in this process on one device.
#[derive(Debug, Clone)]
pub struct SingleDeviceStrategy {
    core: StrategyCore,
    device: Device,
}

impl SingleDeviceStrategy {
    pub fn new(device: Device) -> Self {
        Self {
            core: StrategyCore::default(),
            device,
        }
    }
}

impl Default for SingleDeviceStrategy {
    fn default() -> Self {
        Self::new(Device::cpu())
    }
}

impl Strategy for SingleDeviceStrategy {
    fn name(&self) -> &str {
        "single_device"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::SingleDevice
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn root_device(&self) -> Device {
        self.device.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SingleTpuStrategy {
    core: StrategyCore,
    device: Device,
}

impl SingleTpuStrategy {
    pub fn new(device: Device) -> Self {
        Self {
            core: StrategyCore::default(),
            device,
        }
    }
}

impl Default for SingleTpuStrategy {
    fn default() -> Self {
        Self::new(Device::new(DeviceType::Tpu, 0))
    }
}

impl Strategy for SingleTpuStrategy {
    fn name(&self) -> &str {
        "single_tpu"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::SingleTpu
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn root_device(&self) -> Device {
        self.device.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SingleHpuStrategy {
    core: StrategyCore,
    device: Device,
}

impl Default for SingleHpuStrategy {
    fn default() -> Self {
        Self {
            core: StrategyCore::default(),
            device: Device::of_type(DeviceType::Hpu),
        }
    }
}

impl Strategy for SingleHpuStrategy {
    fn name(&self) -> &str {
        "hpu_single"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::SingleHpu
    }

    fn core(&self) -> &StrategyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.core
    }

    fn root_device(&self) -> Device {
        self.device.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_device_has_no_optional_slots() {
        let mut s = SingleDeviceStrategy::new(Device::new(DeviceType::Cuda, 1));
        assert!(s.cluster_environment_slot().is_none());
        assert!(s.parallel_devices_slot().is_none());
        assert!(s.num_nodes_slot().is_none());
        assert!(s.layer_sync_slot().is_none());
        assert!(s.launcher().is_none());
        assert!(!s.is_distributed());
        assert_eq!(s.root_device().to_string(), "cuda:1");
    }

    #[test]
    fn test_single_tpu_defaults_to_first_core() {
        let s = SingleTpuStrategy::default();
        assert_eq!(s.root_device().to_string(), "tpu:0");
        assert_eq!(s.family(), StrategyFamily::SingleTpu);
    }
}
