use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{ConnectorError, Result};
use crate::strategies::ddp::{DdpSpawnStrategy, DdpStrategy, HpuParallelStrategy, StartMethod};
use crate::strategies::sharded::{DeepSpeedStrategy, FsdpStrategy, OffloadDevice};
use crate::strategies::{
    DataParallelStrategy, IpuStrategy, SingleDeviceStrategy, SingleHpuStrategy, SingleTpuStrategy, Strategy,
    StrategyFamily, XlaStrategy,
};

/// Builds a fresh, unwired strategy instance.
pub type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Registry names that start workers with `fork`.
pub const FORK_ALIASES: [&str; 2] = ["ddp_fork", "ddp_notebook"];

struct Entry {
    factory: StrategyFactory,
    description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub family: StrategyFamily,
    pub description: String,
}

/// Name → strategy factory table.
///
/// Third-party strategies are added with [`StrategyRegistry::register`]
/// before the connector is constructed.
pub struct StrategyRegistry {
    entries: BTreeMap<String, Entry>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.insert("single_device", "Single device on the root device", || {
            Box::new(SingleDeviceStrategy::default())
        });
        r.insert("single_tpu", "Single TPU core", || Box::new(SingleTpuStrategy::default()));
        r.insert("hpu_single", "Single HPU device", || Box::new(SingleHpuStrategy::default()));

        r.insert("ddp", "Distributed data parallel", || Box::new(DdpStrategy::new()));
        r.insert(
            "ddp_find_unused_parameters_false",
            "DDP without the unused-parameter search",
            || Box::new(DdpStrategy::named("ddp_find_unused_parameters_false", Some(false))),
        );
        r.insert(
            "ddp_find_unused_parameters_true",
            "DDP with the unused-parameter search",
            || Box::new(DdpStrategy::named("ddp_find_unused_parameters_true", Some(true))),
        );
        r.insert("ddp_spawn", "DDP with spawned workers", || {
            Box::new(DdpSpawnStrategy::new(StartMethod::Spawn))
        });
        r.insert("ddp_fork", "DDP with forked workers", || {
            Box::new(DdpSpawnStrategy::new(StartMethod::Fork))
        });
        r.insert("ddp_notebook", "DDP with forked workers, for notebooks", || {
            Box::new(DdpSpawnStrategy::named("ddp_notebook", StartMethod::Fork))
        });
        r.insert("dp", "Single-process data parallel", || {
            Box::new(DataParallelStrategy::default())
        });

        r.insert("fsdp", "Fully sharded data parallel", || Box::new(FsdpStrategy::new(false)));
        r.insert("fsdp_cpu_offload", "FSDP with parameters offloaded to CPU", || {
            Box::new(FsdpStrategy::new(true))
        });

        r.insert("deepspeed", "DeepSpeed with the default ZeRO stage", || {
            Box::new(DeepSpeedStrategy::default())
        });
        let stages: [(&'static str, u8, OffloadDevice); 6] = [
            ("deepspeed_stage_1", 1, OffloadDevice::None),
            ("deepspeed_stage_2", 2, OffloadDevice::None),
            ("deepspeed_stage_2_offload", 2, OffloadDevice::Cpu),
            ("deepspeed_stage_3", 3, OffloadDevice::None),
            ("deepspeed_stage_3_offload", 3, OffloadDevice::Cpu),
            ("deepspeed_stage_3_offload_nvme", 3, OffloadDevice::Nvme),
        ];
        for (name, stage, offload) in stages {
            let description = format!("DeepSpeed ZeRO stage {}", stage);
            r.insert(name, &description, move || Box::new(DeepSpeedStrategy::named(name, stage, offload)));
        }

        r.insert("xla", "Multi-core TPU training through XLA", || Box::new(XlaStrategy::default()));
        r.insert("ipu_strategy", "Graphcore IPU", || Box::new(IpuStrategy::default()));
        r.insert("hpu_parallel", "DDP over HPU devices", || Box::new(HpuParallelStrategy::default()));
        r
    }

    fn insert<F>(&mut self, name: &str, description: &str, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Entry {
                factory: Box::new(factory),
                description: description.to_string(),
            },
        );
    }

    /// Add a strategy factory under `name`. Fails if the name is taken
    /// unless `replace` is set.
    pub fn register<F>(&mut self, name: &str, description: &str, factory: F, replace: bool) -> Result<()>
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        if self.entries.contains_key(name) && !replace {
            return Err(ConnectorError::AlreadyRegistered { name: name.to_string() });
        }
        debug!(strategy = name, "registered strategy");
        self.insert(name, description, factory);
        Ok(())
    }

    /// A fresh instance of the named strategy.
    pub fn get(&self, name: &str) -> Option<Box<dyn Strategy>> {
        self.entries.get(name).map(|e| (e.factory)())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn family_of(&self, name: &str) -> Option<StrategyFamily> {
        self.get(name).map(|s| s.family())
    }

    /// Registered names, sorted.
    pub fn available(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn describe(&self) -> Vec<StrategyInfo> {
        self.entries
            .iter()
            .map(|(name, e)| StrategyInfo {
                name: name.clone(),
                family: (e.factory)().family(),
                description: e.description.clone(),
            })
            .collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
