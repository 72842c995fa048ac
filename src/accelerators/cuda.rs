use crate::accelerators::parse::parse_gpu_ids;
use crate::accelerators::{Accelerator, DeviceType, Devices};
use crate::error::Result;
use crate::system::Platform;

/// NVIDIA GPUs, masked by `CUDA_VISIBLE_DEVICES`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaAccelerator;

impl Accelerator for CudaAccelerator {
    fn name(&self) -> &str {
        "cuda"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Cuda
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Cuda)
    }

    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        parse_gpu_ids(self.name(), devices, self.auto_device_count(platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::Device;
    use crate::system::StaticPlatform;

    #[test]
    fn test_cuda_availability_follows_platform() {
        assert!(!CudaAccelerator.is_available(&StaticPlatform::cpu_only()));
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Cuda, 2);
        assert!(CudaAccelerator.is_available(&p));
        assert_eq!(CudaAccelerator.auto_device_count(&p), 2);
    }

    #[test]
    fn test_cuda_parallel_devices_keep_indices() {
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Cuda, 4);
        let ids = CudaAccelerator.parse_devices(&Devices::Indices(vec![2, 3]), &p).unwrap();
        assert_eq!(
            CudaAccelerator.get_parallel_devices(&ids),
            vec![Device::new(DeviceType::Cuda, 2), Device::new(DeviceType::Cuda, 3)]
        );
    }
}
