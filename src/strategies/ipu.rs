use crate::plugins::LayerSync;
use crate::strategies::{ParallelCore, Strategy, StrategyCore, StrategyFamily};

/// Graphcore IPU execution. Replication is handled by the IPU runtime, so
/// there is no launcher, node count or layer sync.
#[derive(Debug, Clone, Default)]
pub struct IpuStrategy {
    parallel: ParallelCore,
}

impl Strategy for IpuStrategy {
    fn name(&self) -> &str {
        "ipu_strategy"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Ipu
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
}
