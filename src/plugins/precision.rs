//! Numeric precision flags and the plugins that implement them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::accelerators::DeviceType;
use crate::error::ConnectorError;

/// Unified precision flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "64-true")]
    True64,
    #[serde(rename = "32-true")]
    True32,
    #[serde(rename = "16-mixed")]
    Mixed16,
    #[serde(rename = "bf16-mixed")]
    Bf16Mixed,
    #[serde(rename = "16-true")]
    True16,
    #[serde(rename = "bf16-true")]
    Bf16True,
}

const ALLOWED: &str = "64-true, 32-true, 16-mixed, bf16-mixed, 16-true, bf16-true";

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::True64 => "64-true",
            Precision::True32 => "32-true",
            Precision::Mixed16 => "16-mixed",
            Precision::Bf16Mixed => "bf16-mixed",
            Precision::True16 => "16-true",
            Precision::Bf16True => "bf16-true",
        }
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, Precision::Mixed16 | Precision::Bf16Mixed)
    }

    /// Parse user input, accepting the legacy spellings `64`, `32`, `16` and
    /// `bf16`. A legacy spelling yields a deprecation message alongside the
    /// unified flag.
    pub fn parse_input(input: &str) -> Result<(Precision, Option<String>), ConnectorError> {
        let input = input.trim();
        if let Ok(precision) = input.parse::<Precision>() {
            return Ok((precision, None));
        }
        let unified = match input {
            "64" => Precision::True64,
            "32" => Precision::True32,
            "16" => Precision::Mixed16,
            "bf16" => Precision::Bf16Mixed,
            other => {
                return Err(ConnectorError::InvalidPrecision {
                    value: other.to_string(),
                    allowed: ALLOWED.to_string(),
                })
            }
        };
        let note = format!(
            "`precision={}` is supported for historical reasons but its usage is discouraged. \
             Please set your precision to {} instead!",
            input,
            unified.as_str()
        );
        Ok((unified, Some(note)))
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "64-true" => Ok(Precision::True64),
            "32-true" => Ok(Precision::True32),
            "16-mixed" => Ok(Precision::Mixed16),
            "bf16-mixed" => Ok(Precision::Bf16Mixed),
            "16-true" => Ok(Precision::True16),
            "bf16-true" => Ok(Precision::Bf16True),
            other => Err(ConnectorError::InvalidPrecision {
                value: other.to_string(),
                allowed: ALLOWED.to_string(),
            }),
        }
    }
}

/// The precision plugin a strategy runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecisionPlugin {
    /// Plain fp32.
    Full,
    Double,
    /// Whole model cast to fp16 / bf16.
    Half(Precision),
    /// Automatic mixed precision on `device`.
    Mixed { precision: Precision, device: DeviceType },
    FsdpMixed { precision: Precision, device: DeviceType },
    DeepSpeed(Precision),
    Tpu,
    TpuBf16,
    Ipu(Precision),
    Hpu(Precision),
    Xpu,
    XpuBf16,
    /// Supplied by a third-party strategy.
    External { name: String, precision: Precision },
}

impl PrecisionPlugin {
    pub fn name(&self) -> &str {
        match self {
            PrecisionPlugin::Full => "PrecisionPlugin",
            PrecisionPlugin::Double => "DoublePrecisionPlugin",
            PrecisionPlugin::Half(_) => "HalfPrecisionPlugin",
            PrecisionPlugin::Mixed { .. } => "MixedPrecisionPlugin",
            PrecisionPlugin::FsdpMixed { .. } => "FSDPMixedPrecisionPlugin",
            PrecisionPlugin::DeepSpeed(_) => "DeepSpeedPrecisionPlugin",
            PrecisionPlugin::Tpu => "TPUPrecisionPlugin",
            PrecisionPlugin::TpuBf16 => "TPUBf16PrecisionPlugin",
            PrecisionPlugin::Ipu(_) => "IPUPrecisionPlugin",
            PrecisionPlugin::Hpu(_) => "HPUPrecisionPlugin",
            PrecisionPlugin::Xpu => "XPUPrecisionPlugin",
            PrecisionPlugin::XpuBf16 => "XPUBf16PrecisionPlugin",
            PrecisionPlugin::External { name, .. } => name,
        }
    }

    /// The precision this plugin actually trains at.
    pub fn precision(&self) -> Precision {
        match self {
            PrecisionPlugin::Full | PrecisionPlugin::Tpu | PrecisionPlugin::Xpu => Precision::True32,
            PrecisionPlugin::Double => Precision::True64,
            PrecisionPlugin::TpuBf16 | PrecisionPlugin::XpuBf16 => Precision::Bf16Mixed,
            PrecisionPlugin::Half(p)
            | PrecisionPlugin::Mixed { precision: p, .. }
            | PrecisionPlugin::FsdpMixed { precision: p, .. }
            | PrecisionPlugin::DeepSpeed(p)
            | PrecisionPlugin::Ipu(p)
            | PrecisionPlugin::Hpu(p)
            | PrecisionPlugin::External { precision: p, .. } => *p,
        }
    }

    pub fn is_tpu(&self) -> bool {
        matches!(self, PrecisionPlugin::Tpu | PrecisionPlugin::TpuBf16)
    }

    /// Parse the textual plugin names accepted on the command line and in
    /// config files.
    pub fn from_name(name: &str) -> Option<Self> {
        let plugin = match name {
            "full" | "32-true" => PrecisionPlugin::Full,
            "double" | "64-true" => PrecisionPlugin::Double,
            "half" | "16-true" => PrecisionPlugin::Half(Precision::True16),
            "half-bf16" | "bf16-true" => PrecisionPlugin::Half(Precision::Bf16True),
            "mixed" | "16-mixed" => PrecisionPlugin::Mixed {
                precision: Precision::Mixed16,
                device: DeviceType::Cuda,
            },
            "mixed-bf16" | "bf16-mixed" => PrecisionPlugin::Mixed {
                precision: Precision::Bf16Mixed,
                device: DeviceType::Cuda,
            },
            "mixed-bf16-cpu" => PrecisionPlugin::Mixed {
                precision: Precision::Bf16Mixed,
                device: DeviceType::Cpu,
            },
            "tpu" => PrecisionPlugin::Tpu,
            "tpu-bf16" => PrecisionPlugin::TpuBf16,
            "xpu" => PrecisionPlugin::Xpu,
            "xpu-bf16" => PrecisionPlugin::XpuBf16,
            _ => return None,
        };
        Some(plugin)
    }
}

impl fmt::Display for PrecisionPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.precision())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unified() {
        assert_eq!(Precision::parse_input("bf16-mixed").unwrap(), (Precision::Bf16Mixed, None));
        assert_eq!(Precision::parse_input(" 32-true ").unwrap().0, Precision::True32);
    }

    #[test]
    fn test_parse_legacy_warns() {
        let (p, note) = Precision::parse_input("16").unwrap();
        assert_eq!(p, Precision::Mixed16);
        assert!(note.unwrap().contains("16-mixed"));
        assert_eq!(Precision::parse_input("bf16").unwrap().0, Precision::Bf16Mixed);
    }

    #[test]
    fn test_parse_invalid() {
        let err = Precision::parse_input("8-true").unwrap_err();
        assert!(err.to_string().contains("Allowed precision values"));
    }

    #[test]
    fn test_plugin_precision() {
        assert_eq!(PrecisionPlugin::TpuBf16.precision(), Precision::Bf16Mixed);
        assert_eq!(PrecisionPlugin::Double.precision(), Precision::True64);
        assert!(PrecisionPlugin::Tpu.is_tpu());
        assert!(!PrecisionPlugin::Full.is_tpu());
        assert_eq!(PrecisionPlugin::from_name("tpu-bf16"), Some(PrecisionPlugin::TpuBf16));
        assert_eq!(PrecisionPlugin::from_name("quantum"), None);
    }
}
