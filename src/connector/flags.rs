//! User-facing connector inputs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accelerators::{Accelerator, Devices};
use crate::plugins::Plugin;
use crate::strategies::Strategy;

/// The `accelerator` argument.
#[derive(Debug, Clone, Default)]
pub enum AcceleratorFlag {
    #[default]
    Auto,
    /// Any GPU backend: MPS, then CUDA.
    Gpu,
    Named(String),
    Instance(Arc<dyn Accelerator>),
}

impl AcceleratorFlag {
    pub fn is_auto(&self) -> bool {
        matches!(self, AcceleratorFlag::Auto)
    }

    pub(crate) fn is_named(&self, name: &str) -> bool {
        matches!(self, AcceleratorFlag::Named(n) if n == name)
    }
}

impl From<&str> for AcceleratorFlag {
    fn from(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "auto" => AcceleratorFlag::Auto,
            "gpu" => AcceleratorFlag::Gpu,
            _ => AcceleratorFlag::Named(name),
        }
    }
}

impl From<Arc<dyn Accelerator>> for AcceleratorFlag {
    fn from(accelerator: Arc<dyn Accelerator>) -> Self {
        AcceleratorFlag::Instance(accelerator)
    }
}

impl fmt::Display for AcceleratorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorFlag::Auto => f.write_str("auto"),
            AcceleratorFlag::Gpu => f.write_str("gpu"),
            AcceleratorFlag::Named(name) => f.write_str(name),
            AcceleratorFlag::Instance(acc) => f.write_str(acc.name()),
        }
    }
}

/// The `strategy` argument.
#[derive(Debug, Default)]
pub enum StrategyFlag {
    #[default]
    Auto,
    Named(String),
    Instance(Box<dyn Strategy>),
}

impl StrategyFlag {
    pub fn is_auto(&self) -> bool {
        matches!(self, StrategyFlag::Auto)
    }
}

impl From<&str> for StrategyFlag {
    fn from(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        if name == "auto" {
            StrategyFlag::Auto
        } else {
            StrategyFlag::Named(name)
        }
    }
}

impl From<Box<dyn Strategy>> for StrategyFlag {
    fn from(strategy: Box<dyn Strategy>) -> Self {
        StrategyFlag::Instance(strategy)
    }
}

impl fmt::Display for StrategyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyFlag::Auto => f.write_str("auto"),
            StrategyFlag::Named(name) => f.write_str(name),
            StrategyFlag::Instance(s) => f.write_str(s.name()),
        }
    }
}

/// The `deterministic` argument: `true`, `false` or `"warn"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DeterministicInput", into = "DeterministicInput")]
pub enum Deterministic {
    Off,
    On,
    /// Deterministic algorithms, but only warn when an op has none.
    Warn,
}

impl Deterministic {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Deterministic::Off)
    }
}

impl From<bool> for Deterministic {
    fn from(on: bool) -> Self {
        if on {
            Deterministic::On
        } else {
            Deterministic::Off
        }
    }
}

impl std::str::FromStr for Deterministic {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(Deterministic::On),
            "false" | "off" | "0" => Ok(Deterministic::Off),
            "warn" => Ok(Deterministic::Warn),
            other => Err(format!("invalid deterministic value '{}'. Expected true, false or warn", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeterministicInput {
    Bool(bool),
    Text(String),
}

impl TryFrom<DeterministicInput> for Deterministic {
    type Error = String;

    fn try_from(input: DeterministicInput) -> std::result::Result<Self, Self::Error> {
        match input {
            DeterministicInput::Bool(b) => Ok(b.into()),
            DeterministicInput::Text(s) => s.parse(),
        }
    }
}

impl From<Deterministic> for DeterministicInput {
    fn from(d: Deterministic) -> Self {
        match d {
            Deterministic::Off => DeterministicInput::Bool(false),
            Deterministic::On => DeterministicInput::Bool(true),
            Deterministic::Warn => DeterministicInput::Text("warn".to_string()),
        }
    }
}

/// Raw inputs for one connector construction.
#[derive(Debug)]
pub struct ConnectorConfig {
    pub accelerator: AcceleratorFlag,
    pub strategy: StrategyFlag,
    /// Precision code, e.g. `"bf16-mixed"`. Legacy codes are accepted.
    pub precision: String,
    pub plugins: Vec<Plugin>,
    pub devices: Devices,
    pub num_nodes: usize,
    pub sync_batchnorm: bool,
    pub benchmark: Option<bool>,
    pub deterministic: Option<Deterministic>,
    pub use_distributed_sampler: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            accelerator: AcceleratorFlag::Auto,
            strategy: StrategyFlag::Auto,
            precision: "32-true".to_string(),
            plugins: Vec::new(),
            devices: Devices::Auto,
            num_nodes: 1,
            sync_batchnorm: false,
            benchmark: None,
            deterministic: None,
            use_distributed_sampler: true,
        }
    }
}

impl ConnectorConfig {
    pub fn accelerator(mut self, accelerator: impl Into<AcceleratorFlag>) -> Self {
        self.accelerator = accelerator.into();
        self
    }

    pub fn strategy(mut self, strategy: impl Into<StrategyFlag>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn accelerator_instance<A: Accelerator + 'static>(mut self, accelerator: A) -> Self {
        self.accelerator = AcceleratorFlag::Instance(Arc::new(accelerator));
        self
    }

    pub fn strategy_instance<S: Strategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = StrategyFlag::Instance(Box::new(strategy));
        self
    }

    pub fn precision(mut self, precision: &str) -> Self {
        self.precision = precision.to_string();
        self
    }

    pub fn plugin(mut self, plugin: impl Into<Plugin>) -> Self {
        self.plugins.push(plugin.into());
        self
    }

    pub fn devices(mut self, devices: impl Into<Devices>) -> Self {
        self.devices = devices.into();
        self
    }

    pub fn num_nodes(mut self, num_nodes: usize) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    pub fn sync_batchnorm(mut self, on: bool) -> Self {
        self.sync_batchnorm = on;
        self
    }

    pub fn benchmark(mut self, on: bool) -> Self {
        self.benchmark = Some(on);
        self
    }

    pub fn deterministic(mut self, deterministic: Deterministic) -> Self {
        self.deterministic = Some(deterministic);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_lowercased() {
        assert!(matches!(AcceleratorFlag::from("GPU"), AcceleratorFlag::Gpu));
        assert!(AcceleratorFlag::from(" CUDA ").is_named("cuda"));
        assert!(StrategyFlag::from("Auto").is_auto());
        assert_eq!(StrategyFlag::from("DDP_Spawn").to_string(), "ddp_spawn");
    }

    #[test]
    fn test_deterministic_toml_forms() {
        #[derive(Deserialize)]
        struct Wrap {
            deterministic: Deterministic,
        }
        let w: Wrap = toml::from_str("deterministic = true").unwrap();
        assert_eq!(w.deterministic, Deterministic::On);
        let w: Wrap = toml::from_str("deterministic = \"warn\"").unwrap();
        assert_eq!(w.deterministic, Deterministic::Warn);
        assert!(toml::from_str::<Wrap>("deterministic = \"maybe\"").is_err());
    }
}
