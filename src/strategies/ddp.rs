//! Multi-process data parallel strategies.

use std::sync::Arc;

use serde::Serialize;

use crate::accelerators::Device;
use crate::plugins::ClusterEnvironment;
use crate::strategies::{Launcher, LauncherKind, ParallelCore, Strategy, StrategyCore, StrategyFamily};

/// One process per device, started by re-running the script.
#[derive(Debug, Clone)]
pub struct DdpStrategy {
    name: &'static str,
    parallel: ParallelCore,
    pub find_unused_parameters: Option<bool>,
}

impl DdpStrategy {
    pub fn new() -> Self {
        Self::named("ddp", None)
    }

    pub(crate) fn named(name: &'static str, find_unused_parameters: Option<bool>) -> Self {
        Self {
            name,
            parallel: ParallelCore::default(),
            find_unused_parameters,
        }
    }

    pub fn with_parallel_devices(mut self, devices: Vec<Device>) -> Self {
        self.parallel.parallel_devices = devices;
        self
    }

    pub fn with_cluster_environment(mut self, env: Arc<dyn ClusterEnvironment>) -> Self {
        self.parallel.cluster_environment = Some(env);
        self
    }

    pub fn global_rank(&self) -> usize {
        self.parallel.global_rank
    }

    pub fn world_size(&self) -> usize {
        self.parallel.world_size
    }
}

impl Default for DdpStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for DdpStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Ddp
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

/// Process start method used by [`DdpSpawnStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMethod {
    #[default]
    Spawn,
    Fork,
}

/// DDP whose workers are started from inside the running process.
#[derive(Debug, Clone)]
pub struct DdpSpawnStrategy {
    name: &'static str,
    parallel: ParallelCore,
    pub start_method: StartMethod,
}

impl DdpSpawnStrategy {
    pub fn new(start_method: StartMethod) -> Self {
        let name = match start_method {
            StartMethod::Spawn => "ddp_spawn",
            StartMethod::Fork => "ddp_fork",
        };
        Self::named(name, start_method)
    }

    pub(crate) fn named(name: &'static str, start_method: StartMethod) -> Self {
        Self {
            name,
            parallel: ParallelCore::default(),
            start_method,
        }
    }

    pub fn with_parallel_devices(mut self, devices: Vec<Device>) -> Self {
        self.parallel.parallel_devices = devices;
        self
    }
}

impl Strategy for DdpSpawnStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::DdpSpawn
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
        let kind = match self.start_method {
            StartMethod::Spawn => LauncherKind::MultiprocessingSpawn,
            StartMethod::Fork => LauncherKind::MultiprocessingFork,
        };
        self.parallel.launcher = Some(Launcher::new(kind));
    }
}

/// DDP over Habana Gaudi devices.
#[derive(Debug, Clone, Default)]
pub struct HpuParallelStrategy {
    parallel: ParallelCore,
}

impl Strategy for HpuParallelStrategy {
    fn name(&self) -> &str {
        "hpu_parallel"
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::HpuParallel
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
    use crate::plugins::EnvironmentKind;
    use crate::system::StaticPlatform;

    #[test]
    fn test_ddp_launcher_follows_environment() {
        let mut local = DdpStrategy::new()
            .with_cluster_environment(EnvironmentKind::Lightning.instantiate(&StaticPlatform::cpu_only()));
        local.configure_launcher();
        assert_eq!(local.launcher().map(|l| l.kind), Some(LauncherKind::SubprocessScript));

        let torchrun = StaticPlatform::cpu_only().with_env("LOCAL_RANK", "0");
        let mut external =
            DdpStrategy::new().with_cluster_environment(EnvironmentKind::Lightning.instantiate(&torchrun));
        external.configure_launcher();
        assert!(external.launcher().is_none());
    }

    #[test]
    fn test_spawn_and_fork_launchers() {
        let mut spawn = DdpSpawnStrategy::new(StartMethod::Spawn);
        spawn.configure_launcher();
        assert!(!spawn.launcher().is_some_and(|l| l.is_interactive_compatible()));

        let mut fork = DdpSpawnStrategy::new(StartMethod::Fork);
        fork.configure_launcher();
        assert_eq!(fork.name(), "ddp_fork");
        assert!(fork.launcher().is_some_and(|l| l.is_interactive_compatible()));
    }

    #[test]
    fn test_ddp_exposes_every_slot() {
        let mut s = DdpStrategy::new();
        assert!(s.cluster_environment_slot().is_some());
        assert!(s.parallel_devices_slot().is_some());
        assert!(s.num_nodes_slot().is_some());
        assert!(s.layer_sync_slot().is_some());
        assert!(s.is_distributed());
    }
}
