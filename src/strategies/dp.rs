use crate::accelerators::Device;
use crate::plugins::LayerSync;
use crate::strategies::{ParallelCore, Strategy, StrategyCore, StrategyFamily};

/// Single-process data parallel: the batch is split across local devices.
///
/// Has no launcher and no notion of nodes.
#[derive(Debug, Clone, Default)]
pub struct DataParallelStrategy {
    parallel: ParallelCore,
}

impl DataParallelStrategy {
    pub fn with_parallel_devices(mut self, devices: Vec<Device>) -> Self {
        self.parallel.parallel_devices = devices;
        self
    }
}

impl Strategy for DataParallelStrategy {
    fn name(&self) -> &str {
        "dp"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::DataParallel
    }

    fn core(&self) -> &StrategyCore {
        &self.parallel.base
    }

    fn core_mut(&mut self) -> &mut StrategyCore {
        &mut self.parallel.base
    }

    fn parallel(&self) -> Option<&ParallelCore> {
        Some(&self.parallel)
    }

    fn parallel_mut(&mut self) -> Option<&mut ParallelCore> {
        Some(&mut self.parallel)
    }

    fn num_nodes_slot(&mut self) -> Option<&mut usize> {
        None
    }

    fn layer_sync_slot(&mut self) -> Option<&mut Option<LayerSync>> {
        None
    }

    fn set_world_ranks(&mut self) {}

    fn root_device(&self) -> Device {
        self.parallel
            .parallel_devices
            .first()
            .cloned()
            .unwrap_or_else(Device::cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::DeviceType;

    #[test]
    fn test_dp_is_single_process() {
        let mut dp = DataParallelStrategy::default()
            .with_parallel_devices(vec![Device::new(DeviceType::Cuda, 2), Device::new(DeviceType::Cuda, 3)]);
        dp.configure_launcher();
        assert!(dp.launcher().is_none());
        assert!(dp.num_nodes_slot().is_none());
        assert!(!dp.is_distributed());
        assert_eq!(dp.root_device().to_string(), "cuda:2");
    }
}
