use crate::strategies::{Launcher, LauncherKind, ParallelCore, Strategy, StrategyCore, StrategyFamily};

/// Multi-core TPU training through XLA. Workers are forked per core.
#[derive(Debug, Clone, Default)]
pub struct XlaStrategy {
    parallel: ParallelCore,
}

impl Strategy for XlaStrategy {
    fn name(&self) -> &str {
        "xla"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Xla
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

    fn configure_launcher(&mut self) {
        self.parallel.launcher = Some(Launcher::new(LauncherKind::Xla));
    }

    fn is_distributed(&self) -> bool {
        self.parallel.world_size > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::{Device, DeviceType};

    #[test]
    fn test_xla_distributed_follows_world_size() {
        let mut s = XlaStrategy::default();
        s.set_world_ranks();
        assert!(!s.is_distributed());

        if let Some(devices) = s.parallel_devices_slot() {
            *devices = (0..8).map(|i| Device::new(DeviceType::Tpu, i)).collect();
        }
        s.set_world_ranks();
        s.configure_launcher();
        assert!(s.is_distributed());
        assert!(s.launcher().is_some_and(|l| l.is_interactive_compatible()));
    }
}
