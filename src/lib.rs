//! lightning-connector -- accelerator, strategy and precision resolution for
//! distributed training runs.
//!
//! The core entry point is [`connector::AcceleratorConnector`], which turns
//! trainer flags into one accelerator, one strategy, one precision plugin and
//! one cluster environment. The crate also carries the cron-driven
//! [`scheduler::SchedulerThread`] that feeds scheduled work calls to an app.

pub mod accelerators;
pub mod config;
pub mod connector;
pub mod error;
pub mod plugins;
pub mod scheduler;
pub mod strategies;
pub mod system;

use crate::accelerators::AcceleratorRegistry;
use crate::connector::{AcceleratorConnector, ConnectorConfig};
use crate::strategies::StrategyRegistry;
use crate::system::Platform;

/// Resolve `config` against the default registries.
pub fn resolve(config: ConnectorConfig, platform: &dyn Platform) -> error::Result<AcceleratorConnector> {
    let accelerators = AcceleratorRegistry::with_defaults();
    let strategies = StrategyRegistry::with_defaults();
    AcceleratorConnector::new(config, &accelerators, &strategies, platform)
}
