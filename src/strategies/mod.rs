//! Strategies -- the distributed-execution topology of a run.
//!
//! Every strategy carries three mandatory slots (accelerator, precision
//! plugin, checkpoint io). Parallel strategies additionally expose a
//! [`ParallelCore`], from which the optional capability slots (cluster
//! environment, parallel devices, node count, layer sync) are derived. A
//! strategy opts out of an individual slot by overriding it to return `None`.

pub mod ddp;
pub mod dp;
pub mod ipu;
pub mod registry;
pub mod sharded;
pub mod single_device;
pub mod xla;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::accelerators::{Accelerator, Device};
use crate::plugins::{CheckpointIo, ClusterEnvironment, LayerSync, Precision, PrecisionPlugin};

pub use self::ddp::{DdpSpawnStrategy, DdpStrategy, HpuParallelStrategy, StartMethod};
pub use self::dp::DataParallelStrategy;
pub use self::ipu::IpuStrategy;
pub use self::registry::StrategyRegistry;
pub use self::sharded::{DeepSpeedStrategy, FsdpStrategy};
pub use self::single_device::{SingleDeviceStrategy, SingleHpuStrategy, SingleTpuStrategy};
pub use self::xla::XlaStrategy;

/// Coarse classification used by the connector's compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    SingleDevice,
    SingleTpu,
    SingleHpu,
    Ddp,
    DdpSpawn,
    Fsdp,
    DeepSpeed,
    Xla,
    Ipu,
    HpuParallel,
    DataParallel,
    Custom,
}

impl StrategyFamily {
    /// Families that run one process per device across the world.
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            StrategyFamily::Ddp
                | StrategyFamily::DdpSpawn
                | StrategyFamily::Fsdp
                | StrategyFamily::DeepSpeed
                | StrategyFamily::Xla
                | StrategyFamily::HpuParallel
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Re-executes the training script once per local process.
    SubprocessScript,
    MultiprocessingSpawn,
    MultiprocessingFork,
    Xla,
}

/// How a strategy starts its worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Launcher {
    pub kind: LauncherKind,
}

impl Launcher {
    pub fn new(kind: LauncherKind) -> Self {
        Self { kind }
    }

    /// Only forked workers survive inside a notebook or REPL.
    pub fn is_interactive_compatible(&self) -> bool {
        matches!(self.kind, LauncherKind::MultiprocessingFork | LauncherKind::Xla)
    }
}

/// The mandatory slots shared by every strategy.
#[derive(Debug, Clone, Default)]
pub struct StrategyCore {
    pub accelerator: Option<Arc<dyn Accelerator>>,
    pub precision_plugin: Option<PrecisionPlugin>,
    pub checkpoint_io: Option<CheckpointIo>,
}

/// State held by every multi-process strategy.
#[derive(Debug, Clone)]
pub struct ParallelCore {
    pub base: StrategyCore,
    pub cluster_environment: Option<Arc<dyn ClusterEnvironment>>,
    pub parallel_devices: Vec<Device>,
    pub num_nodes: usize,
    pub layer_sync: Option<LayerSync>,
    pub launcher: Option<Launcher>,
    pub global_rank: usize,
    pub world_size: usize,
}

impl Default for ParallelCore {
    fn default() -> Self {
        Self {
            base: StrategyCore::default(),
            cluster_environment: None,
            parallel_devices: Vec::new(),
            num_nodes: 1,
            layer_sync: None,
            launcher: None,
            global_rank: 0,
            world_size: 1,
        }
    }
}

impl ParallelCore {
    pub fn num_processes(&self) -> usize {
        self.parallel_devices.len()
    }

    pub fn local_rank(&self) -> usize {
        self.cluster_environment.as_ref().map_or(0, |e| e.local_rank())
    }

    pub fn node_rank(&self) -> usize {
        self.cluster_environment.as_ref().map_or(0, |e| e.node_rank())
    }

    /// Derive this process's global rank and the world size. A scheduler that
    /// dictates either value wins over the computed one.
    pub fn set_world_ranks(&mut self) {
        let computed_rank = self.node_rank() * self.num_processes() + self.local_rank();
        let computed_world = self.num_nodes * self.num_processes();
        let env = self.cluster_environment.as_ref();
        self.global_rank = env.and_then(|e| e.global_rank()).unwrap_or(computed_rank);
        self.world_size = env.and_then(|e| e.world_size()).unwrap_or(computed_world);
    }

    /// Install the script launcher unless the scheduler already started the
    /// processes.
    pub fn configure_subprocess_launcher(&mut self) {
        let external = self
            .cluster_environment
            .as_ref()
            .is_some_and(|e| e.creates_processes_externally());
        self.launcher = (!external).then(|| Launcher::new(LauncherKind::SubprocessScript));
    }

    pub fn root_device(&self) -> Device {
        self.parallel_devices
            .get(self.local_rank())
            .or_else(|| self.parallel_devices.first())
            .cloned()
            .unwrap_or_else(Device::cpu)
    }
}

/// A distributed-execution topology.
pub trait Strategy: fmt::Debug + Send + Sync {
    /// Registry name, e.g. `"ddp_spawn"`.
    fn name(&self) -> &str;

    fn family(&self) -> StrategyFamily;

    fn core(&self) -> &StrategyCore;

    fn core_mut(&mut self) -> &mut StrategyCore;

    /// Present on multi-process strategies.
    fn parallel(&self) -> Option<&ParallelCore> {
        None
    }

    fn parallel_mut(&mut self) -> Option<&mut ParallelCore> {
        None
    }

    fn accelerator(&self) -> Option<&Arc<dyn Accelerator>> {
        self.core().accelerator.as_ref()
    }

    fn set_accelerator(&mut self, accelerator: Arc<dyn Accelerator>) {
        self.core_mut().accelerator = Some(accelerator);
    }

    fn precision_plugin(&self) -> Option<&PrecisionPlugin> {
        self.core().precision_plugin.as_ref()
    }

    fn set_precision_plugin(&mut self, plugin: PrecisionPlugin) {
        self.core_mut().precision_plugin = Some(plugin);
    }

    fn checkpoint_io(&self) -> Option<&CheckpointIo> {
        self.core().checkpoint_io.as_ref()
    }

    fn set_checkpoint_io(&mut self, checkpoint_io: CheckpointIo) {
        self.core_mut().checkpoint_io = Some(checkpoint_io);
    }

    fn is_parallel(&self) -> bool {
        self.parallel().is_some()
    }

    fn cluster_environment(&self) -> Option<Arc<dyn ClusterEnvironment>> {
        self.parallel().and_then(|p| p.cluster_environment.clone())
    }

    fn cluster_environment_slot(&mut self) -> Option<&mut Option<Arc<dyn ClusterEnvironment>>> {
        self.parallel_mut().map(|p| &mut p.cluster_environment)
    }

    fn parallel_devices(&self) -> &[Device] {
        self.parallel().map(|p| p.parallel_devices.as_slice()).unwrap_or(&[])
    }

    fn parallel_devices_slot(&mut self) -> Option<&mut Vec<Device>> {
        self.parallel_mut().map(|p| &mut p.parallel_devices)
    }

    fn num_nodes_slot(&mut self) -> Option<&mut usize> {
        self.parallel_mut().map(|p| &mut p.num_nodes)
    }

    fn layer_sync_slot(&mut self) -> Option<&mut Option<LayerSync>> {
        self.parallel_mut().map(|p| &mut p.layer_sync)
    }

    fn set_world_ranks(&mut self) {
        if let Some(p) = self.parallel_mut() {
            p.set_world_ranks();
        }
    }

    fn configure_launcher(&mut self) {}

    fn launcher(&self) -> Option<&Launcher> {
        self.parallel().and_then(|p| p.launcher.as_ref())
    }

    fn is_distributed(&self) -> bool {
        self.family().is_distributed()
    }

    fn root_device(&self) -> Device {
        self.parallel().map_or_else(Device::cpu, ParallelCore::root_device)
    }

    /// Hook for third-party strategies that ship their own precision
    /// handling. Returning a plugin short-circuits generic selection.
    fn preferred_precision_plugin(&self, _precision: Precision) -> Option<PrecisionPlugin> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::DeviceType;
    use crate::plugins::environments::{EnvironmentKind, SchedulerEnvironment};
    use crate::system::StaticPlatform;

    #[test]
    fn test_world_ranks_from_local_layout() {
        let mut core = ParallelCore {
            parallel_devices: vec![Device::new(DeviceType::Cuda, 0), Device::new(DeviceType::Cuda, 1)],
            num_nodes: 2,
            ..ParallelCore::default()
        };
        let p = StaticPlatform::cpu_only()
            .with_env("LOCAL_RANK", "1")
            .with_env("NODE_RANK", "1");
        core.cluster_environment = Some(Arc::new(SchedulerEnvironment::from_platform(
            EnvironmentKind::Lightning,
            &p,
        )));
        core.set_world_ranks();
        assert_eq!(core.global_rank, 3);
        assert_eq!(core.world_size, 4);
        assert_eq!(core.root_device(), Device::new(DeviceType::Cuda, 1));
    }

    #[test]
    fn test_scheduler_rank_wins() {
        let p = StaticPlatform::cpu_only()
            .with_env("SLURM_NTASKS", "16")
            .with_env("SLURM_PROCID", "9");
        let mut core = ParallelCore {
            parallel_devices: vec![Device::cpu()],
            cluster_environment: Some(EnvironmentKind::Slurm.instantiate(&p)),
            ..ParallelCore::default()
        };
        core.set_world_ranks();
        assert_eq!(core.global_rank, 9);
        assert_eq!(core.world_size, 16);
    }

    #[test]
    fn test_external_environment_skips_launcher() {
        let p = StaticPlatform::cpu_only().with_env("SLURM_NTASKS", "2");
        let mut core = ParallelCore {
            cluster_environment: Some(EnvironmentKind::Slurm.instantiate(&p)),
            ..ParallelCore::default()
        };
        core.configure_subprocess_launcher();
        assert!(core.launcher.is_none());

        core.cluster_environment = Some(EnvironmentKind::Lightning.instantiate(&StaticPlatform::cpu_only()));
        core.configure_subprocess_launcher();
        assert_eq!(core.launcher.map(|l| l.kind), Some(LauncherKind::SubprocessScript));
    }

    #[test]
    fn test_launcher_interactive_compatibility() {
        assert!(Launcher::new(LauncherKind::MultiprocessingFork).is_interactive_compatible());
        assert!(!Launcher::new(LauncherKind::MultiprocessingSpawn).is_interactive_compatible());
        assert!(!Launcher::new(LauncherKind::SubprocessScript).is_interactive_compatible());
    }
}
