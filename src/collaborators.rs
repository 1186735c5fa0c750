//! Interfaces of the numerical collaborators driven by the stage.
//!
//! Array conventions:
//! - trajectory: (n_samples, 2), k-space coordinates in cycles per pixel within [-0.5, 0.5)
//! - density weights: (n_samples)
//! - samples: (n_samples, channels), channel major
//! - coil images and sensitivity maps: (nx, ny, channels)
//! - images and weight images: (nx, ny)
//!
//! Sample rows follow the frame slot order of [FrameWindow].

use crate::device::{ComputeDevice, HostDevice};
use crate::error::CollaboratorResult;
use crate::profile::AcquisitionProfile;
use ndarray::{Array1, Array2, Array3};
use num_complex::Complex32;

/// The profiles of one frame in slot order. Slot 0 holds the newest profile.
pub struct FrameWindow<'a> {
    slots: Vec<&'a AcquisitionProfile>,
    /// stream ordinal of the oldest profile in the window
    first_ordinal: u64,
    samples_per_profile: usize,
}

impl<'a> FrameWindow<'a> {
    /// `chronological` runs oldest to newest; `first_ordinal` is the stream ordinal of its first entry
    pub fn new(chronological: impl DoubleEndedIterator<Item = &'a AcquisitionProfile>, first_ordinal: u64, samples_per_profile: usize) -> Self {
        let slots = chronological.rev().collect();
        Self { slots, first_ordinal, samples_per_profile }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn samples_per_profile(&self) -> usize {
        self.samples_per_profile
    }

    pub fn total_samples(&self) -> usize {
        self.samples_per_profile * self.len()
    }

    pub fn profile(&self, slot: usize) -> &'a AcquisitionProfile {
        self.slots[slot]
    }

    /// iterates slots from 0 (newest) to the oldest profile
    pub fn slots(&self) -> impl Iterator<Item = &'a AcquisitionProfile> + '_ {
        self.slots.iter().copied()
    }

    /// Stream ordinal (profiles since stream start) of the profile in `slot`
    pub fn ordinal(&self, slot: usize) -> u64 {
        self.first_ordinal + (self.len() - 1 - slot) as u64
    }

    /// the newest profile, whose header is copied to the output image
    pub fn anchor(&self) -> Option<&'a AcquisitionProfile> {
        self.slots.first().copied()
    }
}

pub trait TrajectoryCalculator: Send {
    fn trajectory(&mut self, window: &FrameWindow<'_>) -> CollaboratorResult<Array2<f32>>;
}

pub trait DensityCompensator: Send {
    fn weights(&mut self, window: &FrameWindow<'_>, trajectory: &Array2<f32>) -> CollaboratorResult<Array1<f32>>;
}

/// Non-Cartesian SENSE encoding operator
pub trait EncodingOperator: Send {
    /// (re)initializes the operator for an image matrix, its oversampled grid and the gridding kernel
    fn setup(&mut self, matrix_size: [usize; 2], matrix_size_os: [usize; 2], kernel_width: f64) -> CollaboratorResult<()>;
    fn set_csm(&mut self, csm: Array3<Complex32>) -> CollaboratorResult<()>;
    fn csm(&self) -> Option<&Array3<Complex32>>;
    fn set_dcw(&mut self, dcw: Array1<f32>);
    fn preprocess(&mut self, trajectory: &Array2<f32>) -> CollaboratorResult<()>;
    /// coil images to a single image: sum over coils of conj(csm) * image
    fn mult_csm_conj_sum(&self, coil_images: &Array3<Complex32>) -> CollaboratorResult<Array2<Complex32>>;
    /// image to samples
    fn forward(&self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>>;
    /// density weighted adjoint, samples to a coil combined image
    fn adjoint(&self, samples: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>>;
    /// density weighted adjoint per coil, without sensitivity weighting
    fn adjoint_coils(&self, samples: &Array2<Complex32>) -> CollaboratorResult<Array3<Complex32>>;
}

/// Accumulates per coil images over frames for sensitivity estimation
pub trait RhsAccumulator: Send {
    fn set_num_coils(&mut self, channels: usize) -> CollaboratorResult<()>;
    fn add_frame(&mut self, encoding: &dyn EncodingOperator, samples: &Array2<Complex32>) -> CollaboratorResult<()>;
    fn accumulated(&self) -> Option<Array3<Complex32>>;
    fn clear(&mut self);
}

pub trait CsmEstimator: Send {
    fn estimate(&mut self, coil_images: &Array3<Complex32>) -> CollaboratorResult<Array3<Complex32>>;
}

pub trait RegularizationOperator: Send {
    fn set_weight(&mut self, kappa: f64);
    fn weight(&self) -> f64;
    /// derives the (unscaled) regularization weight image from a coil combined image
    fn compute(&mut self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<f32>>;
    /// applies kappa * RᴴR
    fn apply(&self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>>;
}

pub trait Preconditioner: Send {
    fn set_weights(&mut self, weights: Array2<Complex32>) -> CollaboratorResult<()>;
    fn apply(&self, residual: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// log per-iteration progress
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self { max_iterations: 5, tolerance: 1e-6, verbose: false }
    }
}

/// The operators a solve runs against
pub struct SenseSystem<'a> {
    pub encoding: &'a dyn EncodingOperator,
    pub regularization: &'a dyn RegularizationOperator,
    pub preconditioner: &'a dyn Preconditioner,
}

pub trait Solver: Send {
    fn configure(&mut self, settings: SolverSettings);
    /// None means the solver produced no usable image
    fn solve(&mut self, system: &SenseSystem<'_>, samples: &Array2<Complex32>) -> CollaboratorResult<Option<Array2<Complex32>>>;
}

/// All collaborators a stage needs, owned by the stage
pub struct Collaborators {
    pub device: Box<dyn ComputeDevice>,
    pub trajectory: Box<dyn TrajectoryCalculator>,
    pub density: Box<dyn DensityCompensator>,
    pub encoding: Box<dyn EncodingOperator>,
    pub rhs: Box<dyn RhsAccumulator>,
    pub csm: Box<dyn CsmEstimator>,
    pub regularization: Box<dyn RegularizationOperator>,
    pub preconditioner: Box<dyn Preconditioner>,
    pub solver: Box<dyn Solver>,
}

impl Collaborators {
    /// the host reference implementations from [crate::cpu]
    pub fn host() -> Self {
        use crate::cpu::*;
        Self {
            device: Box::new(HostDevice::default()),
            trajectory: Box::new(GoldenAngleRadial::default()),
            density: Box::new(RampDensity::default()),
            encoding: Box::new(DirectSenseOperator::default()),
            rhs: Box::new(CoilImageAccumulator::default()),
            csm: Box::new(RssCsmEstimator::default()),
            regularization: Box::new(ImageWeightRegularizer::default()),
            preconditioner: Box::new(DiagonalPreconditioner::default()),
            solver: Box::new(ConjugateGradientSolver::default()),
        }
    }
}
