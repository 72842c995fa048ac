//! Shared `devices` parsing rules.

use crate::accelerators::Devices;
use crate::error::{ConnectorError, Result};

/// Parse a request for indexable GPU-style devices.
///
/// * `-1` selects every visible device.
/// * `n` selects the first `n` devices.
/// * `[i, j]` selects exactly those indices; duplicates are rejected.
pub fn parse_gpu_ids(accelerator: &str, devices: &Devices, available: usize) -> Result<Vec<usize>> {
    match devices {
        Devices::Auto | Devices::Count(-1) => {
            if available == 0 {
                return Err(ConnectorError::device_parse(
                    accelerator,
                    "no devices are visible on this machine",
                ));
            }
            Ok((0..available).collect())
        }
        Devices::Count(n) if *n < -1 => Err(ConnectorError::device_parse(
            accelerator,
            format!("device count must be -1 or positive, got {}", n),
        )),
        Devices::Count(n) => {
            let n = *n as usize;
            if n > available {
                return Err(ConnectorError::device_parse(
                    accelerator,
                    format!("you requested {} device(s) but your machine only has {}", n, available),
                ));
            }
            Ok((0..n).collect())
        }
        Devices::Indices(ids) => {
            let mut seen = Vec::with_capacity(ids.len());
            for &id in ids {
                if id >= available {
                    return Err(ConnectorError::device_parse(
                        accelerator,
                        format!("you requested device {} but only indices 0..{} are visible", id, available),
                    ));
                }
                if seen.contains(&id) {
                    return Err(ConnectorError::device_parse(
                        accelerator,
                        format!("device {} was requested more than once", id),
                    ));
                }
                seen.push(id);
            }
            Ok(seen)
        }
    }
}

/// Parse a request that only accepts a positive device count.
///
/// `limit` caps the count when the family has a fixed number of devices;
/// `None` means any count is accepted (CPU processes). With a limit, `-1`
/// expands to it.
pub fn parse_count(accelerator: &str, devices: &Devices, auto_count: usize, limit: Option<usize>) -> Result<Vec<usize>> {
    let n = match (devices, limit) {
        (Devices::Auto, _) => auto_count,
        (Devices::Count(-1), Some(all)) => all,
        (devices, _) => match devices {
            Devices::Count(n) if *n > 0 => *n as usize,
            Devices::Indices(ids) => {
                return Err(ConnectorError::device_parse(
                    accelerator,
                    format!("`devices` should be an int > 0, got a list {:?}", ids),
                ))
            }
            other => {
                return Err(ConnectorError::device_parse(
                    accelerator,
                    format!("`devices` should be an int > 0, got {}", other),
                ))
            }
        },
    };
    if let Some(limit) = limit {
        if n > limit {
            return Err(ConnectorError::device_parse(
                accelerator,
                format!("you requested {} device(s) but your machine only has {}", n, limit),
            ));
        }
    }
    Ok((0..n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_ids_count_and_all() {
        assert_eq!(parse_gpu_ids("cuda", &Devices::Count(2), 4).unwrap(), vec![0, 1]);
        assert_eq!(parse_gpu_ids("cuda", &Devices::Count(-1), 3).unwrap(), vec![0, 1, 2]);
        assert!(parse_gpu_ids("cuda", &Devices::Count(5), 4).is_err());
        assert!(parse_gpu_ids("cuda", &Devices::Count(-2), 4).is_err());
    }

    #[test]
    fn test_gpu_ids_explicit() {
        assert_eq!(parse_gpu_ids("cuda", &Devices::Indices(vec![3, 1]), 4).unwrap(), vec![3, 1]);
        assert!(parse_gpu_ids("cuda", &Devices::Indices(vec![4]), 4).is_err());
        assert!(parse_gpu_ids("cuda", &Devices::Indices(vec![1, 1]), 4).is_err());
    }

    #[test]
    fn test_count_rejects_lists_and_negatives() {
        assert_eq!(parse_count("cpu", &Devices::Count(3), 1, None).unwrap().len(), 3);
        assert!(parse_count("cpu", &Devices::Count(-1), 1, None).is_err());
        assert!(parse_count("cpu", &Devices::Indices(vec![0]), 1, None).is_err());
        assert_eq!(parse_count("hpu", &Devices::Count(-1), 8, Some(8)).unwrap().len(), 8);
        assert!(parse_count("hpu", &Devices::Count(9), 8, Some(8)).is_err());
        assert_eq!(parse_count("ipu", &Devices::Auto, 4, Some(4)).unwrap(), vec![0, 1, 2, 3]);
    }
}
