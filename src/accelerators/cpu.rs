use crate::accelerators::parse::parse_count;
use crate::accelerators::{Accelerator, Device, DeviceType, Devices};
use crate::error::Result;
use crate::system::Platform;

/// Plain CPU processes. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAccelerator;

impl Accelerator for CpuAccelerator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    /// One process unless the user asks for more.
    fn auto_device_count(&self, _platform: &dyn Platform) -> usize {
        1
    }

    fn is_available(&self, _platform: &dyn Platform) -> bool {
        true
    }

    /// `devices` counts processes on CPU; explicit indices make no sense here.
    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        parse_count(self.name(), devices, self.auto_device_count(platform), None)
    }

    fn get_parallel_devices(&self, devices: &[usize]) -> Vec<Device> {
        vec![Device::cpu(); devices.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_cpu_parallel_devices_are_all_cpu() {
        let p = StaticPlatform::cpu_only();
        let ids = CpuAccelerator.parse_devices(&Devices::Count(3), &p).unwrap();
        let devices = CpuAccelerator.get_parallel_devices(&ids);
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| *d == Device::cpu()));
    }

    #[test]
    fn test_cpu_auto_is_single_process() {
        let p = StaticPlatform::cpu_only();
        assert_eq!(CpuAccelerator.parse_devices(&Devices::Auto, &p).unwrap(), vec![0]);
        assert!(CpuAccelerator.parse_devices(&Devices::Indices(vec![0, 1]), &p).is_err());
    }
}
