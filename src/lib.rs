//! Sliding window non-Cartesian SENSE reconstruction for streamed MRI readouts.

pub mod actor;
pub mod cfl_io;
pub mod collaborators;
pub mod cpu;
pub mod device;
pub mod error;
pub mod params;
pub mod profile;
pub mod profile_buffer;
pub mod reconfigure;
pub mod simulate;
pub mod sink;
pub mod stage;
pub mod staging;

pub use actor::{StageActor, StageHandle};
pub use collaborators::Collaborators;
pub use error::{ErrorKind, ReconError, Result};
pub use params::{DcwPolicy, StageParameters, StreamHeader};
pub use profile::{AcquisitionHeader, AcquisitionProfile, ImageHeader, ImageResult, StageOutput};
pub use sink::Downstream;
pub use stage::{FrameState, SenseStage};
