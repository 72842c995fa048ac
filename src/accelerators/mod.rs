//! Accelerators -- CPU / CUDA / MPS / TPU / IPU / HPU / XPU device families.
//!
//! An [`Accelerator`] answers three questions for the connector: is this
//! device family present, how many devices does `auto` mean, and which
//! concrete devices does a user's `devices` request select.

pub mod cpu;
pub mod cuda;
pub mod hpu;
pub mod ipu;
pub mod mps;
pub mod parse;
pub mod registry;
pub mod tpu;
pub mod xpu;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::Result;
use crate::system::Platform;

pub use self::cpu::CpuAccelerator;
pub use self::cuda::CudaAccelerator;
pub use self::hpu::HpuAccelerator;
pub use self::ipu::IpuAccelerator;
pub use self::mps::MpsAccelerator;
pub use self::registry::AcceleratorRegistry;
pub use self::tpu::TpuAccelerator;
pub use self::xpu::XpuAccelerator;

/// Physical device family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Cuda,
    Mps,
    Tpu,
    Ipu,
    Hpu,
    Xpu,
    Other(String),
}

impl DeviceType {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "cpu" => DeviceType::Cpu,
            "cuda" | "gpu" => DeviceType::Cuda,
            "mps" => DeviceType::Mps,
            "tpu" | "xla" => DeviceType::Tpu,
            "ipu" => DeviceType::Ipu,
            "hpu" => DeviceType::Hpu,
            "xpu" => DeviceType::Xpu,
            other => DeviceType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Cuda => "cuda",
            DeviceType::Mps => "mps",
            DeviceType::Tpu => "tpu",
            DeviceType::Ipu => "ipu",
            DeviceType::Hpu => "hpu",
            DeviceType::Xpu => "xpu",
            DeviceType::Other(name) => name,
        }
    }

    /// Indexable GPU-style devices whose first entry is the root device.
    pub fn is_gpu(&self) -> bool {
        matches!(self, DeviceType::Cuda | DeviceType::Mps | DeviceType::Xpu)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single device, e.g. `cuda:1` or `cpu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub device_type: DeviceType,
    pub index: Option<usize>,
}

impl Device {
    pub fn new(device_type: DeviceType, index: usize) -> Self {
        Self {
            device_type,
            index: Some(index),
        }
    }

    pub fn cpu() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            index: None,
        }
    }

    pub fn of_type(device_type: DeviceType) -> Self {
        Self {
            device_type,
            index: None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{}", self.device_type, i),
            None => write!(f, "{}", self.device_type),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The user's `devices` request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "DevicesInput", into = "DevicesInput")]
pub enum Devices {
    /// Let the accelerator decide.
    #[default]
    Auto,
    /// Number of devices; `-1` selects all of them.
    Count(i64),
    /// Explicit device indices.
    Indices(Vec<usize>),
}

impl Devices {
    /// `0`, `"0"` and `[]` request no devices at all.
    pub fn is_empty_request(&self) -> bool {
        matches!(self, Devices::Count(0)) || matches!(self, Devices::Indices(v) if v.is_empty())
    }
}

impl fmt::Display for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Devices::Auto => f.write_str("'auto'"),
            Devices::Count(n) => write!(f, "{}", n),
            Devices::Indices(ids) => write!(f, "{:?}", ids),
        }
    }
}

impl FromStr for Devices {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Devices::Auto);
        }
        if s.contains(',') {
            let ids = s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<usize>().map_err(|e| format!("invalid device index '{}': {}", p, e)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(Devices::Indices(ids));
        }
        s.parse::<i64>()
            .map(Devices::Count)
            .map_err(|_| format!("invalid devices value '{}'. Expected 'auto', an integer or a comma list", s))
    }
}

impl From<i64> for Devices {
    fn from(n: i64) -> Self {
        Devices::Count(n)
    }
}

impl From<Vec<usize>> for Devices {
    fn from(ids: Vec<usize>) -> Self {
        Devices::Indices(ids)
    }
}

/// Serde view of [`Devices`]: TOML allows `"auto"`, `2`, `[0, 1]` or `"0,1"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevicesInput {
    Int(i64),
    List(Vec<usize>),
    Text(String),
}

impl TryFrom<DevicesInput> for Devices {
    type Error = String;

    fn try_from(input: DevicesInput) -> std::result::Result<Self, Self::Error> {
        match input {
            DevicesInput::Int(n) => Ok(Devices::Count(n)),
            DevicesInput::List(ids) => Ok(Devices::Indices(ids)),
            DevicesInput::Text(s) => s.parse(),
        }
    }
}

impl From<Devices> for DevicesInput {
    fn from(devices: Devices) -> Self {
        match devices {
            Devices::Auto => DevicesInput::Text("auto".to_string()),
            Devices::Count(n) => DevicesInput::Int(n),
            Devices::Indices(ids) => DevicesInput::List(ids),
        }
    }
}

/// A device family the connector can resolve a run onto.
pub trait Accelerator: fmt::Debug + Send + Sync {
    /// Registry name, e.g. `"cuda"`.
    fn name(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    /// Number of devices `devices="auto"` expands to.
    fn auto_device_count(&self, platform: &dyn Platform) -> usize;

    fn is_available(&self, platform: &dyn Platform) -> bool {
        platform.device_count(&self.device_type()) > 0
    }

    /// Turn a `devices` request into concrete device indices.
    fn parse_devices(&self, devices: &Devices, platform: &dyn Platform) -> Result<Vec<usize>>;

    /// Devices a parallel strategy should run on for the parsed indices.
    fn get_parallel_devices(&self, devices: &[usize]) -> Vec<Device> {
        devices
            .iter()
            .map(|&i| Device::new(self.device_type(), i))
            .collect()
    }
}
