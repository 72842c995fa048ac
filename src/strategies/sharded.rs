//! Sharded data parallel strategies: FSDP and DeepSpeed.

use serde::Serialize;

use crate::strategies::{ParallelCore, Strategy, StrategyCore, StrategyFamily};

/// Fully sharded data parallel. CUDA only.
#[derive(Debug, Clone, Default)]
pub struct FsdpStrategy {
    parallel: ParallelCore,
    pub cpu_offload: bool,
}

impl FsdpStrategy {
    pub fn new(cpu_offload: bool) -> Self {
        Self {
            parallel: ParallelCore::default(),
            cpu_offload,
        }
    }
}

impl Strategy for FsdpStrategy {
    fn name(&self) -> &str {
        if self.cpu_offload {
            "fsdp_cpu_offload"
        } else {
            "fsdp"
        }
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Fsdp
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
        self.parallel.configure_subprocess_launcher();
    }
}

/// Where DeepSpeed offloads optimizer state and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadDevice {
    #[default]
    None,
    Cpu,
    Nvme,
}

/// ZeRO-sharded training through DeepSpeed.
#[derive(Debug, Clone)]
pub struct DeepSpeedStrategy {
    name: &'static str,
    parallel: ParallelCore,
    pub stage: u8,
    pub offload: OffloadDevice,
}

impl DeepSpeedStrategy {
    pub fn new(stage: u8, offload: OffloadDevice) -> Self {
        let name = match (stage, offload) {
            (1, _) => "deepspeed_stage_1",
            (2, OffloadDevice::None) => "deepspeed_stage_2",
            (2, _) => "deepspeed_stage_2_offload",
            (3, OffloadDevice::None) => "deepspeed_stage_3",
            (3, OffloadDevice::Cpu) => "deepspeed_stage_3_offload",
            (3, OffloadDevice::Nvme) => "deepspeed_stage_3_offload_nvme",
            _ => "deepspeed",
        };
        Self::named(name, stage, offload)
    }

    pub(crate) fn named(name: &'static str, stage: u8, offload: OffloadDevice) -> Self {
        Self {
            name,
            parallel: ParallelCore::default(),
            stage,
            offload,
        }
    }
}

impl Default for DeepSpeedStrategy {
    fn default() -> Self {
        Self::named("deepspeed", 2, OffloadDevice::None)
    }
}

impl Strategy for DeepSpeedStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::DeepSpeed
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
        self.parallel.configure_subprocess_launcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deepspeed_stage_names() {
        assert_eq!(DeepSpeedStrategy::new(3, OffloadDevice::Nvme).name(), "deepspeed_stage_3_offload_nvme");
        assert_eq!(DeepSpeedStrategy::new(2, OffloadDevice::Cpu).name(), "deepspeed_stage_2_offload");
        assert_eq!(DeepSpeedStrategy::default().stage, 2);
    }

    #[test]
    fn test_fsdp_offload_name() {
        assert_eq!(FsdpStrategy::new(true).name(), "fsdp_cpu_offload");
        assert!(FsdpStrategy::new(false).is_distributed());
    }
}
