//! Plugins a run can be configured with.
//!
//! A plugin list holds at most one entry of each [`PluginKind`]. Entries are
//! typed values; the `kind:value` text form used by the CLI and config file
//! is turned into a [`Plugin`] with [`Plugin::parse`].

pub mod environments;
pub mod precision;

use std::fmt;
use std::sync::Arc;

use crate::error::{ConnectorError, Result};
use crate::system::Platform;

pub use self::environments::{ClusterEnvironment, EnvironmentKind, SchedulerEnvironment};
pub use self::precision::{Precision, PrecisionPlugin};

/// How checkpoints are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointIo {
    Torch,
    Xla,
    Custom(String),
}

impl CheckpointIo {
    pub fn name(&self) -> &str {
        match self {
            CheckpointIo::Torch => "TorchCheckpointIO",
            CheckpointIo::Xla => "XLACheckpointIO",
            CheckpointIo::Custom(name) => name,
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "torch" => CheckpointIo::Torch,
            "xla" => CheckpointIo::Xla,
            other => CheckpointIo::Custom(other.to_string()),
        }
    }
}

/// Cross-process synchronisation of normalisation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSync {
    TorchSyncBatchNorm,
    Custom(String),
}

impl LayerSync {
    pub fn name(&self) -> &str {
        match self {
            LayerSync::TorchSyncBatchNorm => "TorchSyncBatchNorm",
            LayerSync::Custom(name) => name,
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "torch" | "sync_batchnorm" | "torch_sync_batchnorm" => LayerSync::TorchSyncBatchNorm,
            other => LayerSync::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginKind {
    Precision,
    CheckpointIo,
    ClusterEnvironment,
    LayerSync,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginKind::Precision => "PrecisionPlugin",
            PluginKind::CheckpointIo => "CheckpointIO",
            PluginKind::ClusterEnvironment => "ClusterEnvironment",
            PluginKind::LayerSync => "LayerSync",
        })
    }
}

/// One entry of the `plugins` list.
#[derive(Debug, Clone)]
pub enum Plugin {
    Precision(PrecisionPlugin),
    CheckpointIo(CheckpointIo),
    ClusterEnvironment(Arc<dyn ClusterEnvironment>),
    LayerSync(LayerSync),
}

impl Plugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Precision(_) => PluginKind::Precision,
            Plugin::CheckpointIo(_) => PluginKind::CheckpointIo,
            Plugin::ClusterEnvironment(_) => PluginKind::ClusterEnvironment,
            Plugin::LayerSync(_) => PluginKind::LayerSync,
        }
    }

    /// Parse `kind:value`, e.g. `precision:tpu-bf16`, `checkpoint_io:torch`,
    /// `cluster_environment:slurm` or `layer_sync:torch`.
    ///
    /// Cluster environments named this way are instantiated from `platform`
    /// immediately, without running their detection probe.
    pub fn parse(spec: &str, platform: &dyn Platform) -> Result<Self> {
        let invalid = || ConnectorError::InvalidPlugin {
            value: spec.to_string(),
        };
        let (kind, value) = spec.split_once(':').ok_or_else(invalid)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid());
        }
        match kind.trim().to_ascii_lowercase().as_str() {
            "precision" => PrecisionPlugin::from_name(value)
                .map(Plugin::Precision)
                .ok_or_else(invalid),
            "checkpoint_io" | "checkpoint" => Ok(Plugin::CheckpointIo(CheckpointIo::from_name(value))),
            "cluster_environment" | "environment" => EnvironmentKind::from_name(value)
                .map(|kind| Plugin::ClusterEnvironment(kind.instantiate(platform)))
                .ok_or_else(invalid),
            "layer_sync" => Ok(Plugin::LayerSync(LayerSync::from_name(value))),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plugin::Precision(p) => write!(f, "{}", p),
            Plugin::CheckpointIo(c) => f.write_str(c.name()),
            Plugin::ClusterEnvironment(e) => f.write_str(e.name()),
            Plugin::LayerSync(l) => f.write_str(l.name()),
        }
    }
}

impl From<PrecisionPlugin> for Plugin {
    fn from(p: PrecisionPlugin) -> Self {
        Plugin::Precision(p)
    }
}

impl From<CheckpointIo> for Plugin {
    fn from(c: CheckpointIo) -> Self {
        Plugin::CheckpointIo(c)
    }
}

impl From<LayerSync> for Plugin {
    fn from(l: LayerSync) -> Self {
        Plugin::LayerSync(l)
    }
}

impl From<Arc<dyn ClusterEnvironment>> for Plugin {
    fn from(e: Arc<dyn ClusterEnvironment>) -> Self {
        Plugin::ClusterEnvironment(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_parse_each_kind() {
        let p = StaticPlatform::cpu_only();
        assert_eq!(Plugin::parse("precision:double", &p).unwrap().kind(), PluginKind::Precision);
        assert_eq!(
            Plugin::parse("checkpoint_io:xla", &p).unwrap().kind(),
            PluginKind::CheckpointIo
        );
        let env = Plugin::parse("cluster_environment:slurm", &p).unwrap();
        assert_eq!(env.to_string(), "SLURMEnvironment");
        match Plugin::parse("layer_sync:my_sync", &p).unwrap() {
            Plugin::LayerSync(LayerSync::Custom(name)) => assert_eq!(name, "my_sync"),
            other => panic!("unexpected plugin {}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kinds() {
        let p = StaticPlatform::cpu_only();
        for bad in ["profiler:simple", "precision", "precision:", "precision:fp8", "cluster_environment:yarn"] {
            let err = Plugin::parse(bad, &p).unwrap_err();
            assert!(matches!(err, ConnectorError::InvalidPlugin { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(PluginKind::CheckpointIo.to_string(), "CheckpointIO");
        assert_eq!(PluginKind::LayerSync.to_string(), "LayerSync");
    }
}
