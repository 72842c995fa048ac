use crate::accelerators::parse::parse_count;
use crate::accelerators::{Accelerator, DeviceType, Devices};
use crate::error::{ConnectorError, Result};
use crate::system::Platform;

/// Google TPU cores driven through XLA.
#[derive(Debug, Default, Clone, Copy)]
pub struct TpuAccelerator;

impl Accelerator for TpuAccelerator {
    fn name(&self) -> &str {
        "tpu"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Tpu
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Tpu)
    }

    /// Either a core count, or a single explicit core as `[i]`.
    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        let available = self.auto_device_count(platform);
        match devices {
            Devices::Indices(ids) if ids.len() == 1 => {
                if ids[0] >= available {
                    return Err(ConnectorError::device_parse(
                        self.name(),
                        format!("TPU core {} requested but only {} core(s) are visible", ids[0], available),
                    ));
                }
                Ok(ids.clone())
            }
            Devices::Indices(ids) => Err(ConnectorError::device_parse(
                self.name(),
                format!("a list of TPU cores must hold exactly one index, got {:?}", ids),
            )),
            other => parse_count(self.name(), other, available, Some(available)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_tpu_single_core_index() {
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Tpu, 8);
        assert_eq!(TpuAccelerator.parse_devices(&Devices::Indices(vec![5]), &p).unwrap(), vec![5]);
        assert!(TpuAccelerator.parse_devices(&Devices::Indices(vec![1, 2]), &p).is_err());
        assert_eq!(TpuAccelerator.parse_devices(&Devices::Auto, &p).unwrap().len(), 8);
    }
}
