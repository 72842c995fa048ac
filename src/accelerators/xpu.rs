//! Intel XPU (Arc / Data Center GPU Max) support.
//!
//! Not part of the built-in set: packages that ship XPU kernels register it
//! with [`XpuAccelerator::register_accelerators`] before the connector runs.

use crate::accelerators::parse::parse_gpu_ids;
use crate::accelerators::{Accelerator, AcceleratorRegistry, DeviceType, Devices};
use crate::error::{ConnectorError, Result};
use crate::system::Platform;

#[derive(Debug, Default, Clone, Copy)]
pub struct XpuAccelerator;

impl XpuAccelerator {
    pub fn register_accelerators(registry: &mut AcceleratorRegistry) -> Result<()> {
        registry.register("xpu", XpuAccelerator, "Intel XPU accelerator", false)
    }
}

impl Accelerator for XpuAccelerator {
    fn name(&self) -> &str {
        "xpu"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Xpu
    }

    fn auto_device_count(&self, platform: &dyn Platform) -> usize {
        platform.device_count(&DeviceType::Xpu)
    }

    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>> {
        match devices {
            Devices::Count(n) => pick_multiple_xpus(*n, platform),
            other => parse_gpu_ids(self.name(), other, self.auto_device_count(platform)),
        }
    }
}

/// Pick `nb` XPUs in index order; `-1` picks all of them.
pub fn pick_multiple_xpus(nb: i64, platform: &dyn Platform) -> Result<Vec<usize>> {
    if nb == 0 {
        return Err(ConnectorError::device_parse(
            "xpu",
            "devices=0 is not a valid configuration. Please select a valid number of XPU resources",
        ));
    }
    let num_xpus = platform.device_count(&DeviceType::Xpu);
    if nb < -1 || (nb > 0 && nb as usize > num_xpus) {
        return Err(ConnectorError::device_parse(
            "xpu",
            format!("You requested {} XPUs but your machine only has {} XPUs.", nb, num_xpus),
        ));
    }
    let nb = if nb == -1 { num_xpus } else { nb as usize };

    let mut picked = Vec::with_capacity(nb);
    for _ in 0..nb {
        let next = pick_single_xpu(&picked, platform)?;
        picked.push(next);
    }
    Ok(picked)
}

/// First XPU index not in `exclude`.
pub fn pick_single_xpu(exclude: &[usize], platform: &dyn Platform) -> Result<usize> {
    (0..platform.device_count(&DeviceType::Xpu))
        .find(|i| !exclude.contains(i))
        .ok_or_else(|| ConnectorError::device_parse("xpu", "No XPUs available."))
}
