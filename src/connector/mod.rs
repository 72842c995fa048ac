//! Accelerator connector -- turns loosely typed trainer flags into one
//! accelerator, one strategy, one precision plugin and one cluster
//! environment.
//!
//! Resolution runs in six fixed phases:
//!
//! 1. flag validation and plugin classification
//! 2. accelerator instantiation and device parsing
//! 3. cluster environment detection
//! 4. strategy selection
//! 5. precision plugin selection
//! 6. strategy finalization (wiring, ranks, launcher, compatibility)
//!
//! Later phases read but never revisit what earlier phases decided. Any
//! inconsistency returns an error and no strategy is handed out.

pub mod determinism;
pub mod flags;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::accelerators::{Accelerator, AcceleratorRegistry, Device, DeviceType, Devices};
use crate::error::{ConnectorError, Result};
use crate::plugins::environments;
use crate::plugins::{
    CheckpointIo, ClusterEnvironment, LayerSync, Plugin, PluginKind, Precision, PrecisionPlugin,
};
use crate::strategies::registry::FORK_ALIASES;
use crate::strategies::{
    LauncherKind, SingleDeviceStrategy, SingleHpuStrategy, SingleTpuStrategy, Strategy, StrategyFamily,
    StrategyRegistry,
};
use crate::system::Platform;

pub use self::determinism::BackendFlags;
pub use self::flags::{AcceleratorFlag, ConnectorConfig, Deterministic, StrategyFlag};

/// Accelerators probed for `accelerator="auto"`, in priority order. CPU is
/// the fallback.
const AUTO_PRIORITY: [&str; 5] = ["tpu", "ipu", "hpu", "mps", "cuda"];

/// Backends probed for `accelerator="gpu"`, in priority order.
const GPU_PRIORITY: [&str; 2] = ["mps", "cuda"];

/// Working state while the phases run.
struct ResolvedFlags {
    strategy: StrategyFlag,
    accelerator: AcceleratorFlag,
    precision: Precision,
    precision_plugin: Option<PrecisionPlugin>,
    cluster_environment: Option<Arc<dyn ClusterEnvironment>>,
    parallel_devices: Vec<Device>,
    layer_sync: Option<LayerSync>,
    checkpoint_io: Option<CheckpointIo>,
    devices: Devices,
    num_nodes: usize,
}

/// A fully resolved run configuration.
#[derive(Debug)]
pub struct AcceleratorConnector {
    accelerator: Arc<dyn Accelerator>,
    strategy: Box<dyn Strategy>,
    precision_plugin: PrecisionPlugin,
    cluster_environment: Arc<dyn ClusterEnvironment>,
    checkpoint_io: Option<CheckpointIo>,
    layer_sync: Option<LayerSync>,
    parallel_devices: Vec<Device>,
    devices: Vec<usize>,
    num_nodes: usize,
    precision: Precision,
    backend: BackendFlags,
    use_distributed_sampler: bool,
    warnings: Vec<String>,
}

/// Serializable view of a resolution, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSummary {
    pub accelerator: String,
    pub device_type: DeviceType,
    pub strategy: String,
    pub strategy_family: StrategyFamily,
    pub precision: Precision,
    pub precision_plugin: String,
    pub cluster_environment: String,
    pub devices: Vec<usize>,
    pub parallel_devices: Vec<Device>,
    pub root_device: Device,
    pub num_nodes: usize,
    pub world_size: Option<usize>,
    pub global_rank: Option<usize>,
    pub launcher: Option<LauncherKind>,
    pub checkpoint_io: Option<String>,
    pub layer_sync: Option<String>,
    pub is_distributed: bool,
    pub backend: BackendFlags,
    pub use_distributed_sampler: bool,
    pub warnings: Vec<String>,
}

impl AcceleratorConnector {
    /// Resolve `config` against the registries and the platform.
    pub fn new(
        config: ConnectorConfig,
        accelerators: &AcceleratorRegistry,
        strategies: &StrategyRegistry,
        platform: &dyn Platform,
    ) -> Result<Self> {
        let mut warnings = Vec::new();
        let (backend, backend_warning) =
            determinism::set_backend_flags(config.deterministic, config.benchmark);
        if let Some(w) = backend_warning {
            emit_warning(&mut warnings, w);
        }
        let use_distributed_sampler = config.use_distributed_sampler;

        // 1. flags and plugins
        let mut flags = check_config_and_set_final_flags(config, accelerators, strategies, platform, &mut warnings)?;

        // 2. accelerator
        if let StrategyFlag::Instance(s) = &flags.strategy {
            if s.family() == StrategyFamily::Ipu {
                flags.accelerator = AcceleratorFlag::Named("ipu".to_string());
            }
        }
        // an empty device request is a config error whatever the hardware
        if flags.devices.is_empty_request() {
            return Err(ConnectorError::InvalidDevices {
                devices: flags.devices.to_string(),
                accelerator: flags.accelerator.to_string(),
            });
        }
        flags.accelerator = match flags.accelerator {
            AcceleratorFlag::Auto => AcceleratorFlag::Named(choose_auto_accelerator(accelerators, platform)),
            AcceleratorFlag::Gpu => AcceleratorFlag::Named(choose_gpu_accelerator_backend(accelerators, platform)?),
            other => other,
        };
        let accelerator = instantiate_accelerator(&flags.accelerator, accelerators, platform)?;
        let device_type = accelerator.device_type();
        if matches!(flags.devices, Devices::Auto) {
            flags.devices = Devices::Count(accelerator.auto_device_count(platform) as i64);
        }
        let devices = accelerator.parse_devices(&flags.devices, platform)?;
        if flags.parallel_devices.is_empty() {
            flags.parallel_devices = accelerator.get_parallel_devices(&devices);
        }
        debug!(
            accelerator = accelerator.name(),
            devices = ?devices,
            "accelerator resolved"
        );

        // 3. cluster environment
        let cluster_environment = match flags.cluster_environment.take() {
            Some(env) => env,
            None => environments::detect(platform),
        };

        // 4. strategy
        if flags.strategy.is_auto() {
            flags.strategy = choose_strategy(&device_type, &flags.parallel_devices, flags.num_nodes, platform);
        }
        check_strategy_and_fallback(&flags.strategy, &device_type, strategies, platform)?;
        let strategy = match std::mem::take(&mut flags.strategy) {
            StrategyFlag::Named(name) => strategies.get(&name).ok_or_else(|| ConnectorError::InvalidStrategy {
                name,
                registered: strategies.available().join(", "),
            })?,
            StrategyFlag::Instance(s) => s,
            StrategyFlag::Auto => {
                return Err(ConnectorError::InvalidStrategy {
                    name: "auto".to_string(),
                    registered: strategies.available().join(", "),
                })
            }
        };

        // 5. precision
        let precision_plugin = check_and_init_precision(&mut flags, &*accelerator, &*strategy, &mut warnings)?;

        // 6. finalization
        let mut connector = Self {
            accelerator,
            strategy,
            precision_plugin,
            cluster_environment,
            checkpoint_io: flags.checkpoint_io,
            layer_sync: flags.layer_sync,
            parallel_devices: flags.parallel_devices,
            devices,
            num_nodes: flags.num_nodes,
            precision: flags.precision,
            backend,
            use_distributed_sampler,
            warnings,
        };
        connector.lazy_init_strategy(platform)?;
        determinism::apply_backend_env(&connector.backend, platform);

        info!(
            accelerator = connector.accelerator.name(),
            strategy = connector.strategy.name(),
            precision = %connector.precision_plugin,
            environment = connector.cluster_environment.name(),
            "resolved run configuration"
        );
        Ok(connector)
    }

    /// Wire the resolved pieces into `strategy` and run the final checks.
    fn lazy_init_strategy(&mut self, platform: &dyn Platform) -> Result<()> {
        let strategy = self.strategy.as_mut();
        strategy.set_accelerator(Arc::clone(&self.accelerator));
        strategy.set_precision_plugin(self.precision_plugin.clone());
        if let Some(checkpoint_io) = &self.checkpoint_io {
            strategy.set_checkpoint_io(checkpoint_io.clone());
        }
        if let Some(slot) = strategy.cluster_environment_slot() {
            if let Some(own) = slot.as_ref() {
                self.cluster_environment = Arc::clone(own);
            } else {
                *slot = Some(Arc::clone(&self.cluster_environment));
            }
        }
        if let Some(slot) = strategy.parallel_devices_slot() {
            if slot.is_empty() {
                *slot = self.parallel_devices.clone();
            } else {
                self.parallel_devices = slot.clone();
            }
        }
        if let Some(slot) = strategy.num_nodes_slot() {
            *slot = self.num_nodes;
        }
        if let Some(slot) = strategy.layer_sync_slot() {
            *slot = self.layer_sync.clone();
        }
        strategy.set_world_ranks();
        strategy.configure_launcher();

        if platform.is_interactive() && strategy.launcher().is_some_and(|l| !l.is_interactive_compatible()) {
            return Err(ConnectorError::InteractiveIncompatible {
                strategy: strategy.name().to_string(),
            });
        }

        let family = strategy.family();
        match self.accelerator.device_type() {
            DeviceType::Tpu if !matches!(family, StrategyFamily::SingleTpu | StrategyFamily::Xla) => {
                Err(ConnectorError::IncompatibleStrategy {
                    accelerator: "tpu".to_string(),
                    expected: "a single TPU or XLA strategy",
                    found: strategy.name().to_string(),
                })
            }
            DeviceType::Hpu if !matches!(family, StrategyFamily::SingleHpu | StrategyFamily::HpuParallel) => {
                Err(ConnectorError::IncompatibleStrategy {
                    accelerator: "hpu".to_string(),
                    expected: "a single HPU or HPU parallel strategy",
                    found: strategy.name().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accelerator
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    /// Hand the wired strategy over to the trainer.
    pub fn into_strategy(self) -> Box<dyn Strategy> {
        self.strategy
    }

    pub fn precision_plugin(&self) -> &PrecisionPlugin {
        &self.precision_plugin
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn cluster_environment(&self) -> &Arc<dyn ClusterEnvironment> {
        &self.cluster_environment
    }

    pub fn checkpoint_io(&self) -> Option<&CheckpointIo> {
        self.checkpoint_io.as_ref()
    }

    pub fn layer_sync(&self) -> Option<&LayerSync> {
        self.layer_sync.as_ref()
    }

    pub fn parallel_devices(&self) -> &[Device] {
        &self.parallel_devices
    }

    pub fn devices(&self) -> &[usize] {
        &self.devices
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn backend_flags(&self) -> BackendFlags {
        self.backend
    }

    pub fn use_distributed_sampler(&self) -> bool {
        self.use_distributed_sampler
    }

    /// Warnings emitted during resolution, in order.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_distributed(&self) -> bool {
        let strategy_says = self.strategy.is_distributed();
        if self.accelerator.device_type() == DeviceType::Tpu {
            return self.strategy.family().is_distributed() || strategy_says;
        }
        strategy_says
    }

    pub fn summary(&self) -> ResolutionSummary {
        let parallel = self.strategy.parallel();
        ResolutionSummary {
            accelerator: self.accelerator.name().to_string(),
            device_type: self.accelerator.device_type(),
            strategy: self.strategy.name().to_string(),
            strategy_family: self.strategy.family(),
            precision: self.precision_plugin.precision(),
            precision_plugin: self.precision_plugin.name().to_string(),
            cluster_environment: self.cluster_environment.name().to_string(),
            devices: self.devices.clone(),
            parallel_devices: self.parallel_devices.clone(),
            root_device: self.strategy.root_device(),
            num_nodes: self.num_nodes,
            world_size: parallel.map(|p| p.world_size),
            global_rank: parallel.map(|p| p.global_rank),
            launcher: self.strategy.launcher().map(|l| l.kind),
            checkpoint_io: self.checkpoint_io.as_ref().map(|c| c.name().to_string()),
            layer_sync: self.layer_sync.as_ref().map(|l| l.name().to_string()),
            is_distributed: self.is_distributed(),
            backend: self.backend,
            use_distributed_sampler: self.use_distributed_sampler,
            warnings: self.warnings.clone(),
        }
    }
}

fn emit_warning(warnings: &mut Vec<String>, message: String) {
    warn!("{}", message);
    warnings.push(message);
}

fn check_config_and_set_final_flags(
    config: ConnectorConfig,
    accelerators: &AcceleratorRegistry,
    strategies: &StrategyRegistry,
    platform: &dyn Platform,
    warnings: &mut Vec<String>,
) -> Result<ResolvedFlags> {
    let ConnectorConfig {
        accelerator,
        strategy,
        precision,
        plugins,
        devices,
        num_nodes,
        sync_batchnorm,
        ..
    } = config;

    if let StrategyFlag::Named(name) = &strategy {
        if !strategies.contains(name) {
            return Err(ConnectorError::InvalidStrategy {
                name: name.clone(),
                registered: strategies.available().join(", "),
            });
        }
    }
    if let AcceleratorFlag::Named(name) = &accelerator {
        if !accelerators.contains(name) {
            return Err(ConnectorError::InvalidAccelerator {
                name: name.clone(),
                available: accelerators.available().join(", "),
            });
        }
    }

    // MPS only supports single-device execution.
    let is_parallel_strategy = match &strategy {
        StrategyFlag::Named(name) => name.contains("ddp") || name.contains("deepspeed"),
        StrategyFlag::Instance(s) => s.is_parallel(),
        StrategyFlag::Auto => false,
    };
    let targets_mps = match &accelerator {
        AcceleratorFlag::Auto | AcceleratorFlag::Gpu => true,
        AcceleratorFlag::Named(name) => name == "mps",
        AcceleratorFlag::Instance(acc) => acc.device_type() == DeviceType::Mps,
    };
    if is_parallel_strategy && targets_mps && accelerators.is_available("mps", platform) {
        return Err(ConnectorError::MpsParallelUnsupported {
            strategy: strategy.to_string(),
        });
    }

    let (precision, deprecation) = Precision::parse_input(&precision)?;
    if let Some(note) = deprecation {
        emit_warning(warnings, note);
    }

    let mut flags = ResolvedFlags {
        strategy,
        accelerator,
        precision,
        precision_plugin: None,
        cluster_environment: None,
        parallel_devices: Vec::new(),
        layer_sync: sync_batchnorm.then_some(LayerSync::TorchSyncBatchNorm),
        checkpoint_io: None,
        devices,
        num_nodes,
    };

    let mut counts: BTreeMap<PluginKind, usize> = BTreeMap::new();
    for plugin in plugins {
        *counts.entry(plugin.kind()).or_default() += 1;
        match plugin {
            Plugin::Precision(p) => flags.precision_plugin = Some(p),
            Plugin::CheckpointIo(c) => flags.checkpoint_io = Some(c),
            Plugin::ClusterEnvironment(e) => flags.cluster_environment = Some(e),
            Plugin::LayerSync(l) => {
                if sync_batchnorm && l != LayerSync::TorchSyncBatchNorm {
                    return Err(ConnectorError::LayerSyncConflict {
                        plugin: l.name().to_string(),
                    });
                }
                flags.layer_sync = Some(l);
            }
        }
    }
    let duplicated: Vec<String> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(kind, _)| kind.to_string())
        .collect();
    if !duplicated.is_empty() {
        return Err(ConnectorError::DuplicatePlugins {
            kinds: duplicated.join(", "),
        });
    }

    if let StrategyFlag::Instance(s) = &flags.strategy {
        if let Some(acc) = s.accelerator() {
            if !flags.accelerator.is_auto() {
                return Err(ConnectorError::Conflict {
                    field: "accelerator",
                    source_flag: "accelerator flag",
                });
            }
            flags.accelerator = AcceleratorFlag::Instance(Arc::clone(acc));
        }
        if let Some(p) = s.precision_plugin() {
            if flags.precision_plugin.is_some() {
                return Err(ConnectorError::Conflict {
                    field: "precision",
                    source_flag: "plugins",
                });
            }
            flags.precision_plugin = Some(p.clone());
        }
        if let Some(c) = s.checkpoint_io() {
            if flags.checkpoint_io.is_some() {
                return Err(ConnectorError::Conflict {
                    field: "checkpoint_io",
                    source_flag: "plugins",
                });
            }
            flags.checkpoint_io = Some(c.clone());
        }
        if let Some(env) = s.cluster_environment() {
            if flags.cluster_environment.is_some() {
                return Err(ConnectorError::Conflict {
                    field: "cluster_environment",
                    source_flag: "plugins",
                });
            }
            flags.cluster_environment = Some(env);
        }

        let bound = s.parallel_devices();
        if let Some(first) = bound.first() {
            let accelerator_type = match &flags.accelerator {
                AcceleratorFlag::Instance(acc) => Some(acc.device_type()),
                _ => None,
            };
            match first.device_type {
                DeviceType::Cpu => {
                    let ok = flags.accelerator.is_auto()
                        || flags.accelerator.is_named("cpu")
                        || accelerator_type == Some(DeviceType::Cpu);
                    if !ok {
                        return Err(ConnectorError::DeviceTypeMismatch {
                            device_kind: "CPU",
                            strategy: s.name().to_string(),
                            accelerator: flags.accelerator.to_string(),
                        });
                    }
                    if accelerator_type.is_none() {
                        flags.accelerator = AcceleratorFlag::Named("cpu".to_string());
                    }
                }
                DeviceType::Cuda => {
                    let ok = flags.accelerator.is_auto()
                        || matches!(flags.accelerator, AcceleratorFlag::Gpu)
                        || flags.accelerator.is_named("cuda")
                        || accelerator_type == Some(DeviceType::Cuda);
                    if !ok {
                        return Err(ConnectorError::DeviceTypeMismatch {
                            device_kind: "GPU",
                            strategy: s.name().to_string(),
                            accelerator: flags.accelerator.to_string(),
                        });
                    }
                    if accelerator_type.is_none() {
                        flags.accelerator = AcceleratorFlag::Named("cuda".to_string());
                    }
                }
                _ => {}
            }
            flags.parallel_devices = bound.to_vec();
        }
    }

    Ok(flags)
}

fn choose_auto_accelerator(accelerators: &AcceleratorRegistry, platform: &dyn Platform) -> String {
    AUTO_PRIORITY
        .iter()
        .find(|name| accelerators.is_available(name, platform))
        .map_or_else(|| "cpu".to_string(), |name| name.to_string())
}

fn choose_gpu_accelerator_backend(accelerators: &AcceleratorRegistry, platform: &dyn Platform) -> Result<String> {
    GPU_PRIORITY
        .iter()
        .find(|name| accelerators.is_available(name, platform))
        .map(|name| name.to_string())
        .ok_or(ConnectorError::NoGpuBackend)
}

fn instantiate_accelerator(
    flag: &AcceleratorFlag,
    accelerators: &AcceleratorRegistry,
    platform: &dyn Platform,
) -> Result<Arc<dyn Accelerator>> {
    let accelerator = match flag {
        AcceleratorFlag::Instance(acc) => Arc::clone(acc),
        AcceleratorFlag::Named(name) => accelerators.get(name).ok_or_else(|| ConnectorError::InvalidAccelerator {
            name: name.clone(),
            available: accelerators.available().join(", "),
        })?,
        AcceleratorFlag::Auto | AcceleratorFlag::Gpu => {
            return Err(ConnectorError::InvalidAccelerator {
                name: flag.to_string(),
                available: accelerators.available().join(", "),
            })
        }
    };
    if !accelerator.is_available(platform) {
        return Err(ConnectorError::AcceleratorUnavailable {
            accelerator: accelerator.name().to_string(),
            available: accelerators.available_on(platform),
        });
    }
    Ok(accelerator)
}

fn choose_strategy(
    device_type: &DeviceType,
    parallel_devices: &[Device],
    num_nodes: usize,
    platform: &dyn Platform,
) -> StrategyFlag {
    let named = |name: &str| StrategyFlag::Named(name.to_string());
    let multi_device = parallel_devices.len() > 1;
    match device_type {
        DeviceType::Ipu => return named("ipu_strategy"),
        DeviceType::Hpu if multi_device => return named("hpu_parallel"),
        DeviceType::Hpu => return StrategyFlag::Instance(Box::new(SingleHpuStrategy::default())),
        DeviceType::Tpu if multi_device => return named("xla"),
        DeviceType::Tpu => {
            let strategy = match parallel_devices.first() {
                Some(device) => SingleTpuStrategy::new(device.clone()),
                None => SingleTpuStrategy::default(),
            };
            return StrategyFlag::Instance(Box::new(strategy));
        }
        _ => {}
    }
    if num_nodes > 1 {
        return named("ddp");
    }
    if !multi_device {
        let device = if device_type.is_gpu() {
            parallel_devices
                .first()
                .cloned()
                .unwrap_or_else(|| Device::of_type(device_type.clone()))
        } else {
            Device::cpu()
        };
        return StrategyFlag::Instance(Box::new(SingleDeviceStrategy::new(device)));
    }
    if platform.is_interactive() {
        return named("ddp_fork");
    }
    named("ddp")
}

fn check_strategy_and_fallback(
    strategy: &StrategyFlag,
    device_type: &DeviceType,
    strategies: &StrategyRegistry,
    platform: &dyn Platform,
) -> Result<()> {
    let family = match strategy {
        StrategyFlag::Named(name) => strategies.family_of(name),
        StrategyFlag::Instance(s) => Some(s.family()),
        StrategyFlag::Auto => None,
    };
    if family == Some(StrategyFamily::Fsdp) && *device_type != DeviceType::Cuda {
        return Err(ConnectorError::FsdpRequiresGpu {
            strategy: strategy.to_string(),
        });
    }
    if let StrategyFlag::Named(name) = strategy {
        if FORK_ALIASES.contains(&name.as_str()) && !platform.supports_fork() {
            return Err(ConnectorError::ForkUnsupported { strategy: name.clone() });
        }
    }
    Ok(())
}

fn validate_precision_choice(flags: &ResolvedFlags, device_type: &DeviceType) -> Result<()> {
    let unsupported = |accelerator: &str| ConnectorError::UnsupportedPrecision {
        accelerator: accelerator.to_string(),
        precision: flags.precision.to_string(),
    };
    match device_type {
        DeviceType::Tpu => {
            if flags.precision == Precision::True64 {
                return Err(unsupported("tpu"));
            }
            if let Some(plugin) = &flags.precision_plugin {
                if !plugin.is_tpu() {
                    return Err(ConnectorError::IncompatiblePrecisionPlugin {
                        accelerator: "tpu".to_string(),
                        expected: "TPU",
                        found: plugin.name().to_string(),
                    });
                }
            }
        }
        DeviceType::Hpu => {
            let hpu_supported = |p: Precision| matches!(p, Precision::Mixed16 | Precision::Bf16Mixed | Precision::True32);
            if !hpu_supported(flags.precision) {
                return Err(unsupported("hpu"));
            }
            if let Some(plugin) = &flags.precision_plugin {
                if !hpu_supported(plugin.precision()) {
                    return Err(ConnectorError::IncompatiblePrecisionPlugin {
                        accelerator: "hpu".to_string(),
                        expected: "16-mixed, bf16-mixed or 32-true",
                        found: format!("{} ({})", plugin.name(), plugin.precision()),
                    });
                }
            }
        }
        DeviceType::Xpu if flags.precision_plugin.is_none() => {
            if !matches!(flags.precision, Precision::True32 | Precision::Bf16Mixed) {
                return Err(unsupported("xpu"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_and_init_precision(
    flags: &mut ResolvedFlags,
    accelerator: &dyn Accelerator,
    strategy: &dyn Strategy,
    warnings: &mut Vec<String>,
) -> Result<PrecisionPlugin> {
    let device_type = accelerator.device_type();
    validate_precision_choice(flags, &device_type)?;
    if let Some(plugin) = &flags.precision_plugin {
        return Ok(plugin.clone());
    }

    match device_type {
        DeviceType::Ipu => return Ok(PrecisionPlugin::Ipu(flags.precision)),
        DeviceType::Hpu => return Ok(PrecisionPlugin::Hpu(flags.precision)),
        DeviceType::Tpu => match flags.precision {
            Precision::True32 => return Ok(PrecisionPlugin::Tpu),
            Precision::Mixed16 | Precision::Bf16Mixed => {
                if flags.precision == Precision::Mixed16 {
                    emit_warning(
                        warnings,
                        "You passed `accelerator='tpu', precision='16-mixed'` but AMP with fp16 is not \
                         supported on TPUs. Using `precision='bf16-mixed'` instead."
                            .to_string(),
                    );
                    flags.precision = Precision::Bf16Mixed;
                }
                return Ok(PrecisionPlugin::TpuBf16);
            }
            _ => {}
        },
        DeviceType::Xpu => match flags.precision {
            Precision::True32 => return Ok(PrecisionPlugin::Xpu),
            Precision::Bf16Mixed => return Ok(PrecisionPlugin::XpuBf16),
            _ => {}
        },
        _ => {}
    }

    if let Some(plugin) = strategy.preferred_precision_plugin(flags.precision) {
        return Ok(plugin);
    }
    if strategy.family() == StrategyFamily::DeepSpeed {
        return Ok(PrecisionPlugin::DeepSpeed(flags.precision));
    }

    match flags.precision {
        Precision::True32 => return Ok(PrecisionPlugin::Full),
        Precision::True64 => return Ok(PrecisionPlugin::Double),
        Precision::True16 | Precision::Bf16True => return Ok(PrecisionPlugin::Half(flags.precision)),
        Precision::Mixed16 | Precision::Bf16Mixed => {}
    }

    if flags.precision == Precision::Mixed16 && device_type == DeviceType::Cpu {
        emit_warning(
            warnings,
            "You passed `accelerator='cpu', precision='16-mixed'` but AMP with fp16 is not supported on \
             CPU. Using `precision='bf16-mixed'` instead."
                .to_string(),
        );
        flags.precision = Precision::Bf16Mixed;
    }
    info!(
        "Using {} Automatic Mixed Precision (AMP)",
        if flags.precision == Precision::Mixed16 {
            "16bit"
        } else {
            "bfloat16"
        }
    );
    let device = if device_type == DeviceType::Cpu {
        DeviceType::Cpu
    } else {
        DeviceType::Cuda
    };
    if strategy.family() == StrategyFamily::Fsdp {
        return Ok(PrecisionPlugin::FsdpMixed {
            precision: flags.precision,
            device,
        });
    }
    Ok(PrecisionPlugin::Mixed {
        precision: flags.precision,
        device,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    fn resolve(config: ConnectorConfig, platform: &StaticPlatform) -> Result<AcceleratorConnector> {
        AcceleratorConnector::new(
            config,
            &AcceleratorRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
            platform,
        )
    }

    #[test]
    fn test_auto_priority_prefers_tpu() {
        let p = StaticPlatform::cpu_only()
            .with_devices(DeviceType::Tpu, 8)
            .with_devices(DeviceType::Cuda, 2);
        assert_eq!(choose_auto_accelerator(&AcceleratorRegistry::with_defaults(), &p), "tpu");
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Cuda, 2);
        assert_eq!(choose_auto_accelerator(&AcceleratorRegistry::with_defaults(), &p), "cuda");
    }

    #[test]
    fn test_gpu_without_backend() {
        let err = resolve(ConnectorConfig::default().accelerator("gpu"), &StaticPlatform::cpu_only()).unwrap_err();
        assert!(matches!(err, ConnectorError::NoGpuBackend));
    }

    #[test]
    fn test_choose_strategy_single_gpu_root_device() {
        let devices = vec![Device::new(DeviceType::Cuda, 3)];
        let p = StaticPlatform::cpu_only();
        match choose_strategy(&DeviceType::Cuda, &devices, 1, &p) {
            StrategyFlag::Instance(s) => assert_eq!(s.root_device().to_string(), "cuda:3"),
            other => panic!("expected an instance, got {}", other),
        }
    }

    #[test]
    fn test_interactive_multi_gpu_picks_fork() {
        let devices = vec![Device::new(DeviceType::Cuda, 0), Device::new(DeviceType::Cuda, 1)];
        let p = StaticPlatform::cpu_only().interactive(true);
        assert_eq!(choose_strategy(&DeviceType::Cuda, &devices, 1, &p).to_string(), "ddp_fork");
        let p = StaticPlatform::cpu_only();
        assert_eq!(choose_strategy(&DeviceType::Cuda, &devices, 1, &p).to_string(), "ddp");
    }

    #[test]
    fn test_cpu_mixed_16_upgrades_to_bf16() {
        let c = resolve(ConnectorConfig::default().precision("16-mixed"), &StaticPlatform::cpu_only()).unwrap();
        assert_eq!(
            c.precision_plugin(),
            &PrecisionPlugin::Mixed {
                precision: Precision::Bf16Mixed,
                device: DeviceType::Cpu
            }
        );
        assert_eq!(c.warnings().len(), 1);
    }
}
