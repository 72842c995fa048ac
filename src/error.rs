//! Error types raised while resolving a training run configuration.

use thiserror::Error;

/// Every way accelerator/strategy/precision resolution can fail.
///
/// All variants are fatal to the run: the connector returns the error before
/// handing out any strategy instance.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(
        "You selected an invalid strategy name: `strategy={name:?}`. It must be either a registered \
         name or a Strategy instance. Example choices: auto, ddp, ddp_spawn, deepspeed, ... \
         Registered names: {registered}"
    )]
    InvalidStrategy { name: String, registered: String },

    #[error("You selected an invalid accelerator name: `accelerator={name:?}`. Available names are: auto, {available}.")]
    InvalidAccelerator { name: String, available: String },

    #[error(
        "You set `strategy={strategy}` but strategies from the DDP family are not supported on the \
         MPS accelerator. Either explicitly set `accelerator='cpu'` or change the strategy."
    )]
    MpsParallelUnsupported { strategy: String },

    #[error("Received multiple values for {kinds} flags in `plugins`. Expected one value for each type at most.")]
    DuplicatePlugins { kinds: String },

    #[error("Found invalid plugin {value:?}. Expected one of: precision, checkpoint_io, cluster_environment or layer_sync.")]
    InvalidPlugin { value: String },

    #[error(
        "You set `sync_batchnorm=true` and provided a `{plugin}` layer sync plugin, but this is not \
         allowed. Choose one or the other."
    )]
    LayerSyncConflict { plugin: String },

    #[error("{field} set through both strategy class and {source_flag}, choose one")]
    Conflict {
        field: &'static str,
        source_flag: &'static str,
    },

    #[error(
        "{device_kind} parallel_devices set through {strategy} strategy, but accelerator set to \
         {accelerator}, please choose one device type"
    )]
    DeviceTypeMismatch {
        device_kind: &'static str,
        strategy: String,
        accelerator: String,
    },

    #[error("No supported gpu backend found!")]
    NoGpuBackend,

    #[error("`devices={devices}` value is not a valid input using {accelerator} accelerator.")]
    InvalidDevices { devices: String, accelerator: String },

    #[error("Invalid device request for {accelerator}: {message}")]
    DeviceParse { accelerator: String, message: String },

    #[error(
        "`{accelerator}` can not run on your system since the accelerator is not available. The \
         following accelerator(s) is available and can be passed into `accelerator`: {available:?}."
    )]
    AcceleratorUnavailable {
        accelerator: String,
        available: Vec<String>,
    },

    #[error("You selected strategy to be `{strategy}`, but GPU accelerator is not used.")]
    FsdpRequiresGpu { strategy: String },

    #[error(
        "You selected `strategy='{strategy}'` but process forking is not supported on this platform. \
         We recommend `strategy='ddp_spawn'` instead."
    )]
    ForkUnsupported { strategy: String },

    #[error("Precision {value:?} is invalid. Allowed precision values: {allowed}")]
    InvalidPrecision { value: String, allowed: String },

    #[error("`accelerator='{accelerator}', precision='{precision}'` is not supported.")]
    UnsupportedPrecision { accelerator: String, precision: String },

    #[error("The `{accelerator}` accelerator can only be used with a {expected} precision plugin, found: {found}.")]
    IncompatiblePrecisionPlugin {
        accelerator: String,
        expected: &'static str,
        found: String,
    },

    #[error(
        "`strategy={strategy:?}` is not compatible with an interactive environment. Run your code as \
         a script, or choose one of the compatible strategies: `strategy='dp'|'ddp_notebook'`."
    )]
    InteractiveIncompatible { strategy: String },

    #[error("The `{accelerator}` accelerator can only be used with {expected}, found {found}.")]
    IncompatibleStrategy {
        accelerator: String,
        expected: &'static str,
        found: String,
    },

    #[error("'{name}' is already registered. Pass `replace = true` to overwrite it.")]
    AlreadyRegistered { name: String },
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    pub fn device_parse(accelerator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceParse {
            accelerator: accelerator.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the host rather than the requested flags.
    pub fn is_platform_error(&self) -> bool {
        matches!(
            self,
            Self::ForkUnsupported { .. }
                | Self::InteractiveIncompatible { .. }
                | Self::AcceleratorUnavailable { .. }
                | Self::NoGpuBackend
        )
    }
}
