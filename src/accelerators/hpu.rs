use crate::accelerators::parse::parse_count;
use crate::accelerators::{Accelerator, DeviceType, Devices};
use crate::error::Result;
use crate::system::Platform;

/// Habana Gaudi HPUs, masked by `HABANA_VISIBLE_DEVICES`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HpuAccelerator;

impl Accelerator for HpuAccelerator {
    fn name(&self) -> &str {
        "hpu"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Hpu
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Hpu)
    }

    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        let available = self.auto_device_count(platform);
        parse_count(self.name(), devices, available, Some(available))
    }
}
