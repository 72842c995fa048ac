use std::fs;
use std::path::Path;

use tracing::debug;

use crate::accelerators::DeviceType;
use crate::system::Platform;

/// The machine this process is running on.
///
/// Devices are counted from device nodes and sysfs, then masked by the
/// matching `*_VISIBLE_DEVICES` variable when it is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl HostPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for HostPlatform {
    fn device_count(&self, device_type: &DeviceType) -> usize {
        let count = match device_type {
            DeviceType::Cpu => 1,
            DeviceType::Cuda => masked(count_dev_nodes("/dev", "nvidia"), "CUDA_VISIBLE_DEVICES"),
            DeviceType::Mps => usize::from(cfg!(all(target_os = "macos", target_arch = "aarch64"))),
            DeviceType::Tpu => count_dev_nodes("/dev", "accel"),
            DeviceType::Ipu => count_dev_nodes("/dev", "ipu"),
            DeviceType::Hpu => masked(count_dev_nodes("/dev", "hl"), "HABANA_VISIBLE_DEVICES"),
            DeviceType::Xpu => masked(count_drm_cards_with_driver(&["i915", "xe"]), "XPU_VISIBLE_DEVICES"),
            DeviceType::Other(_) => 0,
        };
        debug!(device = %device_type, count, "probed host devices");
        count
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_env_var(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn is_interactive(&self) -> bool {
        std::env::var("LIGHTNING_INTERACTIVE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    fn supports_fork(&self) -> bool {
        cfg!(unix)
    }
}

/// Count entries named `<prefix><digits>` in `dir` (e.g. `/dev/nvidia0`).
fn count_dev_nodes(dir: &str, prefix: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        })
        .count()
}

/// Count DRM cards whose kernel driver matches one of `drivers`.
fn count_drm_cards_with_driver(drivers: &[&str]) -> usize {
    let drm = Path::new("/sys/class/drm");
    let Ok(entries) = fs::read_dir(drm) else {
        return 0;
    };
    let mut count = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // card0, card1 ... but not card0-HDMI-A-1
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }
        if let Ok(target) = fs::read_link(entry.path().join("device/driver")) {
            let target = target.to_string_lossy();
            if drivers.iter().any(|d| target.ends_with(d)) {
                count += 1;
            }
        }
    }
    count
}

/// Apply a `*_VISIBLE_DEVICES` mask to a physical device count.
fn masked(physical: usize, var: &str) -> usize {
    match std::env::var(var) {
        Ok(visible) => visible_count(&visible).min(physical),
        Err(_) => physical,
    }
}

fn visible_count(visible: &str) -> usize {
    visible
        .split(',')
        .map(str::trim)
        .take_while(|id| !id.is_empty() && !id.starts_with('-'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_count() {
        assert_eq!(visible_count("0,1,2"), 3);
        assert_eq!(visible_count(""), 0);
        assert_eq!(visible_count("1,"), 1);
        // a negative id hides every device after it
        assert_eq!(visible_count("0,-1,2"), 1);
    }

    #[test]
    fn test_count_dev_nodes_missing_dir() {
        assert_eq!(count_dev_nodes("/definitely/not/here", "nvidia"), 0);
    }

    #[test]
    fn test_count_dev_nodes_filters_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["nvidia0", "nvidia1", "nvidiactl", "nvidia-uvm", "sda"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(count_dev_nodes(dir.path().to_str().unwrap(), "nvidia"), 2);
    }

    #[test]
    fn test_host_always_has_a_cpu() {
        assert_eq!(HostPlatform::new().device_count(&DeviceType::Cpu), 1);
        assert_eq!(
            HostPlatform::new().device_count(&DeviceType::Other("npu".to_string())),
            0
        );
    }
}
