//! Host introspection used by the connector's availability probes.
//!
//! The connector never touches the machine directly. Everything it needs to
//! know about hardware, environment variables and the process context goes
//! through [`Platform`], so resolution can be replayed against a
//! [`StaticPlatform`] in tests and in `resolve --simulate`.

pub mod host;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::accelerators::DeviceType;

pub use self::host::HostPlatform;

/// Probe surface queried during resolution.
pub trait Platform: Send + Sync {
    /// Number of visible devices of the given type (after any
    /// `*_VISIBLE_DEVICES` masking).
    fn device_count(&self, device_type: &DeviceType) -> usize;

    /// Read an environment variable.
    fn env_var(&self, key: &str) -> Option<String>;

    /// Write an environment variable for the current process.
    fn set_env_var(&self, key: &str, value: &str);

    /// Whether the run was started from an interactive session (notebook, REPL).
    fn is_interactive(&self) -> bool;

    /// Whether the OS supports the `fork` process start method.
    fn supports_fork(&self) -> bool;

    fn env_is_set(&self, key: &str) -> bool {
        self.env_var(key).is_some()
    }

    fn env_usize(&self, key: &str) -> Option<usize> {
        self.env_var(key).and_then(|v| v.trim().parse().ok())
    }
}

/// A fixed, in-memory platform.
///
/// Device counts and environment are whatever the caller declares. Writes
/// made through [`Platform::set_env_var`] are recorded and visible to later
/// reads.
#[derive(Debug)]
pub struct StaticPlatform {
    devices: HashMap<DeviceType, usize>,
    env: Mutex<HashMap<String, String>>,
    interactive: bool,
    fork: bool,
}

impl StaticPlatform {
    /// A CPU-only machine with an empty environment.
    pub fn cpu_only() -> Self {
        let mut devices = HashMap::new();
        devices.insert(DeviceType::Cpu, 1);
        Self {
            devices,
            env: Mutex::new(HashMap::new()),
            interactive: false,
            fork: true,
        }
    }

    pub fn with_devices(mut self, device_type: DeviceType, count: usize) -> Self {
        self.devices.insert(device_type, count);
        self
    }

    pub fn with_env(self, key: &str, value: &str) -> Self {
        if let Ok(mut env) = self.env.lock() {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn fork_supported(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// Parse a simulation spec such as `cuda=4,mps=0`.
    pub fn from_spec(spec: &str) -> anyhow::Result<Self> {
        let mut platform = Self::cpu_only();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, count) = part
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Invalid device spec '{}'. Expected 'type=count'", part))?;
            let count: usize = count
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid device count in '{}': {}", part, e))?;
            platform = match name.trim() {
                "interactive" => platform.interactive(count > 0),
                "fork" => platform.fork_supported(count > 0),
                other => platform.with_devices(DeviceType::from_name(other), count),
            };
        }
        Ok(platform)
    }
}

impl Platform for StaticPlatform {
    fn device_count(&self, device_type: &DeviceType) -> usize {
        self.devices.get(device_type).copied().unwrap_or(0)
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.env.lock().ok().and_then(|env| env.get(key).cloned())
    }

    fn set_env_var(&self, key: &str, value: &str) {
        if let Ok(mut env) = self.env.lock() {
            env.insert(key.to_string(), value.to_string());
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn supports_fork(&self) -> bool {
        self.fork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_only_has_no_gpus() {
        let p = StaticPlatform::cpu_only();
        assert_eq!(p.device_count(&DeviceType::Cpu), 1);
        assert_eq!(p.device_count(&DeviceType::Cuda), 0);
        assert!(p.supports_fork());
        assert!(!p.is_interactive());
    }

    #[test]
    fn test_env_writes_are_visible() {
        let p = StaticPlatform::cpu_only();
        assert!(!p.env_is_set("CUBLAS_WORKSPACE_CONFIG"));
        p.set_env_var("CUBLAS_WORKSPACE_CONFIG", ":4096:8");
        assert_eq!(p.env_var("CUBLAS_WORKSPACE_CONFIG").as_deref(), Some(":4096:8"));
    }

    #[test]
    fn test_from_spec() {
        let p = StaticPlatform::from_spec("cuda=4, tpu=0, interactive=1").unwrap();
        assert_eq!(p.device_count(&DeviceType::Cuda), 4);
        assert_eq!(p.device_count(&DeviceType::Tpu), 0);
        assert!(p.is_interactive());
        assert!(StaticPlatform::from_spec("cuda").is_err());
        assert!(StaticPlatform::from_spec("cuda=x").is_err());
    }
}
