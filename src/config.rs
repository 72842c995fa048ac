//! TOML configuration for `lightning-connector`.
//!
//! Every section is optional; a missing section takes its defaults. The file
//! is looked up via `LIGHTNING_CONNECTOR_CONFIG`, then `./lightning.toml`.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accelerators::xpu::XpuAccelerator;
use crate::accelerators::{AcceleratorRegistry, Devices};
use crate::connector::{ConnectorConfig, Deterministic};
use crate::plugins::Plugin;
use crate::scheduler::Schedules;
use crate::system::Platform;

pub const CONFIG_ENV: &str = "LIGHTNING_CONNECTOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "lightning.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightningConfig {
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LightningConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: the file named by `LIGHTNING_CONNECTOR_CONFIG`,
    /// `./lightning.toml`, then compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LIGHTNING_CONNECTOR_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_PATH);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Accelerator registry with the built-ins plus configured extensions.
    pub fn accelerator_registry(&self) -> Result<AcceleratorRegistry> {
        let mut registry = AcceleratorRegistry::with_defaults();
        self.extensions.register(&mut registry)?;
        Ok(registry)
    }

    /// Build the schedule table. Entries without a start time start at `now`.
    pub fn schedule_table(&self, now: DateTime<Utc>) -> Result<Schedules> {
        let table = Schedules::new();
        for entry in &self.schedules {
            table
                .add(&entry.call_hash, &entry.name, &entry.cron, entry.start_time.unwrap_or(now))
                .with_context(|| format!("invalid schedule '{}'", entry.name))?;
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Trainer flags as they appear in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub accelerator: String,
    pub strategy: String,
    pub precision: String,
    pub devices: Devices,
    pub num_nodes: usize,
    /// `kind:value` plugin specs, e.g. `"cluster_environment:slurm"`.
    pub plugins: Vec<String>,
    pub sync_batchnorm: bool,
    pub benchmark: Option<bool>,
    pub deterministic: Option<Deterministic>,
    pub use_distributed_sampler: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            accelerator: "auto".to_string(),
            strategy: "auto".to_string(),
            precision: "32-true".to_string(),
            devices: Devices::Auto,
            num_nodes: 1,
            plugins: Vec::new(),
            sync_batchnorm: false,
            benchmark: None,
            deterministic: None,
            use_distributed_sampler: true,
        }
    }
}

impl TrainerConfig {
    pub fn to_connector_config(&self, platform: &dyn Platform) -> Result<ConnectorConfig> {
        let mut config = ConnectorConfig::default()
            .accelerator(self.accelerator.as_str())
            .strategy(self.strategy.as_str())
            .precision(&self.precision)
            .devices(self.devices.clone())
            .num_nodes(self.num_nodes)
            .sync_batchnorm(self.sync_batchnorm);
        for spec in &self.plugins {
            let plugin = Plugin::parse(spec, platform).with_context(|| format!("invalid plugin '{}'", spec))?;
            config = config.plugin(plugin);
        }
        config.benchmark = self.benchmark;
        config.deterministic = self.deterministic;
        config.use_distributed_sampler = self.use_distributed_sampler;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

/// Out-of-tree accelerators to register before resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub accelerators: Vec<String>,
}

impl ExtensionsConfig {
    pub fn register(&self, registry: &mut AcceleratorRegistry) -> Result<()> {
        for name in &self.accelerators {
            match name.trim().to_ascii_lowercase().as_str() {
                "xpu" => {
                    if !registry.contains("xpu") {
                        XpuAccelerator::register_accelerators(registry)?;
                    }
                }
                other => bail!("unknown accelerator extension '{}'. Known extensions: xpu", other),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 1000 }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// One `[[schedules]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub call_hash: String,
    pub name: String,
    pub cron: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human formatter.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = LightningConfig::default();
        assert_eq!(cfg.trainer.accelerator, "auto");
        assert_eq!(cfg.trainer.precision, "32-true");
        assert_eq!(cfg.trainer.num_nodes, 1);
        assert!(cfg.trainer.use_distributed_sampler);
        assert_eq!(cfg.scheduler.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.schedules.is_empty());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[trainer]
accelerator = "cuda"
strategy = "ddp"
precision = "bf16-mixed"
devices = [0, 1]
num_nodes = 2
plugins = ["cluster_environment:lightning", "checkpoint_io:torch"]
deterministic = "warn"

[extensions]
accelerators = ["xpu"]

[scheduler]
poll_interval_ms = 250

[[schedules]]
call_hash = "a1b2"
name = "root.retrain"
cron = "0 * * * *"

[logging]
level = "debug"
json = true
"#;
        let cfg: LightningConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.trainer.devices, Devices::Indices(vec![0, 1]));
        assert_eq!(cfg.trainer.deterministic, Some(Deterministic::Warn));
        assert_eq!(cfg.scheduler.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.schedules.len(), 1);
        assert!(cfg.logging.json);

        let registry = cfg.accelerator_registry().unwrap();
        assert!(registry.contains("xpu"));

        let connector = cfg.trainer.to_connector_config(&StaticPlatform::cpu_only()).unwrap();
        assert_eq!(connector.plugins.len(), 2);
        assert_eq!(connector.num_nodes, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: LightningConfig = toml::from_str("[trainer]\ndevices = \"auto\"\n").unwrap();
        assert_eq!(cfg.trainer.devices, Devices::Auto);
        assert_eq!(cfg.trainer.strategy, "auto");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let cfg: LightningConfig = toml::from_str("[extensions]\naccelerators = [\"npu\"]\n").unwrap();
        assert!(cfg.accelerator_registry().is_err());
    }

    #[test]
    fn test_bad_plugin_spec() {
        let trainer = TrainerConfig {
            plugins: vec!["precision".to_string()],
            ..TrainerConfig::default()
        };
        assert!(trainer.to_connector_config(&StaticPlatform::cpu_only()).is_err());
    }
}
