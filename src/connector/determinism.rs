//! cuDNN benchmark / deterministic-algorithm settings.

use serde::Serialize;

use crate::connector::flags::Deterministic;
use crate::system::Platform;

/// Workspace setting cuBLAS needs for reproducible results.
pub const CUBLAS_WORKSPACE_CONFIG: &str = ":4096:8";

/// Backend switches derived from `benchmark` and `deterministic`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendFlags {
    /// `None` leaves the backend default untouched.
    pub cudnn_benchmark: Option<bool>,
    pub deterministic_algorithms: Option<bool>,
    pub warn_only: bool,
}

/// Compute the backend flags.
///
/// Returns the flags plus an optional warning for the deterministic +
/// benchmark combination. Nothing is written to the platform here; see
/// [`apply_backend_env`].
pub fn set_backend_flags(deterministic: Option<Deterministic>, benchmark: Option<bool>) -> (BackendFlags, Option<String>) {
    let enabled = deterministic.is_some_and(|d| d.is_enabled());
    let mut warning = None;
    let mut benchmark = benchmark;
    if enabled {
        match benchmark {
            None => benchmark = Some(false),
            Some(true) => {
                warning = Some(
                    "You passed `deterministic=true` and `benchmark=true`. Note that cuDNN ignores \
                     deterministic mode when benchmark mode is on."
                        .to_string(),
                )
            }
            Some(false) => {}
        }
    }

    let flags = BackendFlags {
        cudnn_benchmark: benchmark,
        deterministic_algorithms: deterministic.map(|d| d.is_enabled()),
        warn_only: deterministic == Some(Deterministic::Warn),
    };

    (flags, warning)
}

/// Export the cuBLAS workspace setting when deterministic algorithms are on.
///
/// Only called once resolution has succeeded.
pub fn apply_backend_env(flags: &BackendFlags, platform: &dyn Platform) {
    if flags.deterministic_algorithms == Some(true) {
        platform.set_env_var("CUBLAS_WORKSPACE_CONFIG", CUBLAS_WORKSPACE_CONFIG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticPlatform;

    #[test]
    fn test_untouched_when_unset() {
        let p = StaticPlatform::cpu_only();
        let (flags, warning) = set_backend_flags(None, None);
        assert_eq!(flags, BackendFlags::default());
        assert!(warning.is_none());
        apply_backend_env(&flags, &p);
        assert!(p.env_var("CUBLAS_WORKSPACE_CONFIG").is_none());
    }

    #[test]
    fn test_deterministic_disables_benchmark() {
        let p = StaticPlatform::cpu_only();
        let (flags, warning) = set_backend_flags(Some(Deterministic::On), None);
        assert_eq!(flags.cudnn_benchmark, Some(false));
        assert_eq!(flags.deterministic_algorithms, Some(true));
        assert!(warning.is_none());
        assert!(p.env_var("CUBLAS_WORKSPACE_CONFIG").is_none());
        apply_backend_env(&flags, &p);
        assert_eq!(p.env_var("CUBLAS_WORKSPACE_CONFIG").as_deref(), Some(":4096:8"));
    }

    #[test]
    fn test_deterministic_with_benchmark_warns() {
        let (flags, warning) = set_backend_flags(Some(Deterministic::Warn), Some(true));
        assert_eq!(flags.cudnn_benchmark, Some(true));
        assert!(flags.warn_only);
        assert!(warning.unwrap().contains("benchmark=true"));
    }

    #[test]
    fn test_deterministic_off_is_passed_through() {
        let p = StaticPlatform::cpu_only();
        let (flags, _) = set_backend_flags(Some(Deterministic::Off), Some(true));
        assert_eq!(flags.deterministic_algorithms, Some(false));
        assert_eq!(flags.cudnn_benchmark, Some(true));
        apply_backend_env(&flags, &p);
        assert!(p.env_var("CUBLAS_WORKSPACE_CONFIG").is_none());
    }
}
