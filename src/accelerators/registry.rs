use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::accelerators::{
    Accelerator, CpuAccelerator, CudaAccelerator, HpuAccelerator, IpuAccelerator, MpsAccelerator,
    TpuAccelerator,
};
use crate::error::{ConnectorError, Result};
use crate::system::Platform;

struct Entry {
    accelerator: Arc<dyn Accelerator>,
    description: String,
}

/// Snapshot of one registered accelerator.
#[derive(Debug, Clone, Serialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub device_count: usize,
}

/// Name → accelerator table consulted by the connector.
///
/// Built explicitly at startup; external packages add entries with
/// [`AcceleratorRegistry::register`] before a connector is constructed.
pub struct AcceleratorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl AcceleratorRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in accelerators: cpu, cuda, mps, tpu, ipu, hpu.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [(Arc<dyn Accelerator>, &str); 6] = [
            (Arc::new(CpuAccelerator), "CPU accelerator"),
            (Arc::new(CudaAccelerator), "CUDA accelerator"),
            (Arc::new(MpsAccelerator), "Apple Metal (MPS) accelerator"),
            (Arc::new(TpuAccelerator), "TPU accelerator"),
            (Arc::new(IpuAccelerator), "IPU accelerator"),
            (Arc::new(HpuAccelerator), "HPU accelerator"),
        ];
        for (accelerator, description) in builtins {
            registry.entries.insert(
                accelerator.name().to_string(),
                Entry {
                    accelerator,
                    description: description.to_string(),
                },
            );
        }
        registry
    }

    /// Add an accelerator under `name`. Fails if the name is taken unless
    /// `replace` is set.
    pub fn register<A>(&mut self, name: &str, accelerator: A, description: &str, replace: bool) -> Result<()>
    where
        A: Accelerator + 'static,
    {
        if self.entries.contains_key(name) && !replace {
            return Err(ConnectorError::AlreadyRegistered { name: name.to_string() });
        }
        debug!(accelerator = name, "registered accelerator");
        self.entries.insert(
            name.to_string(),
            Entry {
                accelerator: Arc::new(accelerator),
                description: description.to_string(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Accelerator>> {
        self.entries.get(name).map(|e| Arc::clone(&e.accelerator))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn available(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Availability probe for a registered name. Unknown names are unavailable.
    pub fn is_available(&self, name: &str, platform: &dyn Platform) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.accelerator.is_available(platform))
    }

    /// Registered names whose probe succeeds on `platform`.
    pub fn available_on(&self, platform: &dyn Platform) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.accelerator.is_available(platform))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn describe(&self, platform: &dyn Platform) -> Vec<AcceleratorInfo> {
        self.entries
            .iter()
            .map(|(name, e)| AcceleratorInfo {
                name: name.clone(),
                description: e.description.clone(),
                available: e.accelerator.is_available(platform),
                device_count: e.accelerator.auto_device_count(platform),
            })
            .collect()
    }
}

impl Default for AcceleratorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerators::DeviceType;
    use crate::system::StaticPlatform;

    #[test]
    fn test_defaults_registered() {
        let registry = AcceleratorRegistry::with_defaults();
        assert_eq!(registry.available(), vec!["cpu", "cuda", "hpu", "ipu", "mps", "tpu"]);
        assert!(registry.get("cuda").is_some());
        assert!(registry.get("xpu").is_none());
    }

    #[test]
    fn test_available_on_platform() {
        let registry = AcceleratorRegistry::with_defaults();
        let p = StaticPlatform::cpu_only().with_devices(DeviceType::Cuda, 2);
        assert_eq!(registry.available_on(&p), vec!["cpu", "cuda"]);
        assert!(registry.is_available("cuda", &p));
        assert!(!registry.is_available("tpu", &p));
        assert!(!registry.is_available("nope", &p));
    }

    #[test]
    fn test_register_rejects_duplicates_unless_replacing() {
        let mut registry = AcceleratorRegistry::with_defaults();
        assert!(registry.register("cpu", CpuAccelerator, "again", false).is_err());
        assert!(registry.register("cpu", CpuAccelerator, "again", true).is_ok());
        let info = registry.describe(&StaticPlatform::cpu_only());
        assert_eq!(info.iter().find(|i| i.name == "cpu").unwrap().description, "again");
    }
}
