use crate::accelerators::parse::parse_count;
use crate::accelerators::{Accelerator, DeviceType, Devices};
use crate::error::Result;
use crate::system::Platform;

/// Graphcore IPUs.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpuAccelerator;

impl Accelerator for IpuAccelerator {
    fn name(&self) -> &str {
        "ipu"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Ipu
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Ipu)
    }

    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        let available = self.auto_device_count(platform);
        parse_count(self.name(), devices, available, Some(available))
    }
}
