use crate::accelerators::parse::parse_gpu_ids;
use crate::accelerators::{Accelerator, DeviceType, Devices};
use crate::error::Result;
use crate::system::Platform;

/// Apple Silicon GPU. At most one device, single-device strategies only.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpsAccelerator;

impl Accelerator for MpsAccelerator {
    fn name(&self) -> &str {
        "mps"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Mps
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Mps).min(1)
    }

    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        parse_gpu_ids(self.name(), devices, self.auto_device_count(platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_mps_caps_at_one_device() {
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Mps, 1);
        assert_eq!(MpsAccelerator.parse_devices(&Devices::Count(1), &p).unwrap(), vec![0]);
        assert!(MpsAccelerator.parse_devices(&Devices::Count(2), &p).is_err());
    }
}
