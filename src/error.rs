//! Error types for the reconstruction stage.

use std::fmt;
use thiserror::Error;

/// Result type alias for stage operations
pub type Result<T> = std::result::Result<T, ReconError>;

/// Result type returned by the numerical collaborators
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Failure reported by an external numerical collaborator (trajectory, operator, solver, ...)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The per-frame reconstruction steps, used to tag compute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconStep {
    Trajectory,
    DensityCompensation,
    Upload,
    Preprocess,
    Accumulate,
    CsmEstimation,
    CoilCombine,
    Regularization,
    Preconditioner,
    Solve,
    /// forward encoding of simulated data
    Forward,
}

impl fmt::Display for ReconStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trajectory => "trajectory",
            Self::DensityCompensation => "density compensation",
            Self::Upload => "sample upload",
            Self::Preprocess => "operator preprocessing",
            Self::Accumulate => "rhs accumulation",
            Self::CsmEstimation => "csm estimation",
            Self::CoilCombine => "coil combination",
            Self::Regularization => "regularization",
            Self::Preconditioner => "preconditioner weights",
            Self::Solve => "solve",
            Self::Forward => "forward encoding",
        };
        f.write_str(name)
    }
}

/// Broad failure class. Configuration errors halt the stage, the others only fail the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Compute,
    Io,
}

/// Error type for stage operations
#[derive(Error, Debug)]
pub enum ReconError {
    /// Data arrived before the stream header was processed
    #[error("data received before configuration complete")]
    NotConfigured,

    /// A previous configuration failure stopped the stage
    #[error("stage halted after a configuration failure")]
    Halted,

    #[error("no compute devices available")]
    NoComputeDevice,

    #[error("unable to select compute device {index}: {reason}")]
    DeviceSelection { index: usize, reason: String },

    /// Stream header carries an unsupported number of encoding spaces
    #[error("only one encoding space is supported, found {found}")]
    EncodingSpaces { found: usize },

    /// Image dimensions must fit the 16 bit fields of the image header
    #[error("matrix {x}x{y} exceeds the image header limit of 65535")]
    MatrixTooLarge { x: usize, y: usize },

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: &'static str, reason: String },

    /// Channel dependent collaborators could not be rebuilt
    #[error("unable to set up encoding operator for {channels} channels")]
    OperatorRebuild {
        channels: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("{step} failed")]
    Compute {
        step: ReconStep,
        #[source]
        source: CollaboratorError,
    },

    /// The solver finished without producing an image
    #[error("solver returned no image")]
    NoSolution,

    #[error("downstream rejected {what}: {reason}")]
    Rejected { what: &'static str, reason: String },

    /// Samples addressed outside the current staging layout
    #[error("samples do not fit the host staging layout: {reason}")]
    StagingLayout { reason: String },

    /// A buffered profile does not have the layout the active frame expects
    #[error("profile {scan_counter} has unexpected shape: {reason}")]
    PayloadShape { scan_counter: u32, reason: String },

    /// The thread owning the stage has stopped
    #[error("stage worker is not running")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl ReconError {
    pub(crate) fn compute(step: ReconStep, source: CollaboratorError) -> Self {
        Self::Compute { step, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured
            | Self::Halted
            | Self::NoComputeDevice
            | Self::DeviceSelection { .. }
            | Self::EncodingSpaces { .. }
            | Self::MatrixTooLarge { .. }
            | Self::InvalidParameter { .. }
            | Self::Allocation { .. }
            | Self::OperatorRebuild { .. } => ErrorKind::Configuration,
            Self::Compute { .. } | Self::NoSolution => ErrorKind::Compute,
            Self::Rejected { .. }
            | Self::PayloadShape { .. }
            | Self::StagingLayout { .. }
            | Self::Disconnected
            | Self::Io(_)
            | Self::Json(_)
            | Self::TomlDe(_)
            | Self::TomlSer(_)
            | Self::Pattern(_) => ErrorKind::Io,
        }
    }

    /// true if the stage must not process anything after this error. Calls made out of order
    /// and rejected parameter updates are configuration errors that leave the stage usable.
    pub fn halts_stage(&self) -> bool {
        match self {
            Self::NotConfigured | Self::Halted | Self::InvalidParameter { .. } => false,
            other => other.kind() == ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_error_names_step() {
        let err = ReconError::compute(ReconStep::Trajectory, CollaboratorError::new("bad spokes"));
        assert_eq!(err.to_string(), "trajectory failed");
        assert_eq!(err.kind(), ErrorKind::Compute);
        assert!(!err.halts_stage());
        let source = std::error::Error::source(&err).expect("source is kept");
        assert_eq!(source.to_string(), "bad spokes");
    }

    #[test]
    fn configuration_errors_halt() {
        assert!(ReconError::EncodingSpaces { found: 2 }.halts_stage());
        assert!(ReconError::NoComputeDevice.halts_stage());
        let rebuild = ReconError::OperatorRebuild { channels: 8, source: CollaboratorError::new("oom") };
        assert!(rebuild.halts_stage());
        assert!(rebuild.to_string().contains("8 channels"));
    }

    #[test]
    fn out_of_order_calls_do_not_halt() {
        assert_eq!(ReconError::NotConfigured.kind(), ErrorKind::Configuration);
        assert!(!ReconError::NotConfigured.halts_stage());
        let bad_update = ReconError::InvalidParameter {
            parameter: "profiles_per_frame".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert!(!bad_update.halts_stage());
    }

    #[test]
    fn io_errors_do_not_halt() {
        let err = ReconError::Rejected { what: "image", reason: "queue full".to_string() };
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.halts_stage());
        assert!(err.to_string().contains("queue full"));
        let layout = ReconError::StagingLayout { reason: "slot 4 channel 0".to_string() };
        assert_eq!(layout.kind(), ErrorKind::Io);
        assert!(!layout.halts_stage());
    }

    #[test]
    fn oversized_matrix_halts() {
        let err = ReconError::MatrixTooLarge { x: 70000, y: 16 };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.halts_stage());
        assert!(err.to_string().contains("70000x16"));
    }
}
