//! Recording mock collaborators shared by the integration tests.
#![allow(dead_code)]

use ndarray::{Array1, Array2, Array3, ShapeBuilder};
use num_complex::Complex32;
use sense_reco::collaborators::{
    Collaborators, CsmEstimator, DensityCompensator, EncodingOperator, FrameWindow, Preconditioner,
    RegularizationOperator, RhsAccumulator, SenseSystem, Solver, SolverSettings, TrajectoryCalculator,
};
use sense_reco::device::{ComputeDevice, DeviceProperties};
use sense_reco::error::{CollaboratorError, CollaboratorResult};
use sense_reco::{AcquisitionHeader, AcquisitionProfile};
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the mocks observed
#[derive(Debug, Default)]
pub struct Log {
    pub selected_device: Option<usize>,
    pub setups: Vec<([usize; 2], [usize; 2], f64)>,
    pub csm_channels: Vec<usize>,
    pub rhs_coils: Vec<usize>,
    pub rhs_frames: usize,
    pub rhs_clears: usize,
    /// stream ordinals per slot of every trajectory request
    pub windows: Vec<Vec<u64>>,
    /// scan counters per slot of every trajectory request
    pub window_scans: Vec<Vec<u32>>,
    pub density_calls: usize,
    /// (samples, channels) of every upload
    pub uploads: Vec<(usize, usize)>,
    /// first sample of every channel of the last upload
    pub last_upload: Option<Array2<Complex32>>,
    pub precon_weights: Option<Array2<Complex32>>,
    pub solver_settings: Option<SolverSettings>,
    pub kappa: Option<f64>,
    pub solves: usize,
}

#[derive(Clone, Default)]
pub struct Shared(Arc<Mutex<Log>>);

impl Shared {
    pub fn log(&self) -> MutexGuard<'_, Log> {
        self.0.lock().unwrap()
    }
}

/// Failure switches for the mocks
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub trajectory: bool,
    pub solver_returns_none: bool,
    /// encoding setup fails for this channel count
    pub setup_fails_for: Option<usize>,
}

pub struct MockDevice {
    pub count: usize,
    pub warp_size: usize,
    pub log: Shared,
}

impl ComputeDevice for MockDevice {
    fn device_count(&self) -> CollaboratorResult<usize> {
        Ok(self.count)
    }

    fn select(&mut self, index: usize) -> CollaboratorResult<()> {
        self.log.log().selected_device = Some(index);
        Ok(())
    }

    fn properties(&self, index: usize) -> CollaboratorResult<DeviceProperties> {
        Ok(DeviceProperties { name: format!("mock{index}"), warp_size: self.warp_size })
    }

    fn upload(&self, host: &[Complex32], dim: (usize, usize)) -> CollaboratorResult<Array2<Complex32>> {
        let data = Array2::from_shape_vec(dim.f(), host[..dim.0 * dim.1].to_vec())
            .map_err(|e| CollaboratorError::new(e.to_string()))?;
        let mut log = self.log.log();
        log.uploads.push(dim);
        log.last_upload = Some(data.clone());
        Ok(data)
    }
}

struct MockTrajectory {
    log: Shared,
    fail: bool,
}

impl TrajectoryCalculator for MockTrajectory {
    fn trajectory(&mut self, window: &FrameWindow<'_>) -> CollaboratorResult<Array2<f32>> {
        if self.fail {
            return Err(CollaboratorError::new("trajectory unavailable"));
        }
        let mut log = self.log.log();
        log.windows.push((0..window.len()).map(|s| window.ordinal(s)).collect());
        log.window_scans.push(window.slots().map(|p| p.header.scan_counter).collect());
        Ok(Array2::zeros((window.total_samples(), 2)))
    }
}

struct MockDensity {
    log: Shared,
}

impl DensityCompensator for MockDensity {
    fn weights(&mut self, window: &FrameWindow<'_>, _trajectory: &Array2<f32>) -> CollaboratorResult<Array1<f32>> {
        self.log.log().density_calls += 1;
        Ok(Array1::ones(window.total_samples()))
    }
}

struct MockEncoding {
    log: Shared,
    matrix: [usize; 2],
    csm: Option<Array3<Complex32>>,
    setup_fails_for: Option<usize>,
}

impl EncodingOperator for MockEncoding {
    fn setup(&mut self, matrix_size: [usize; 2], matrix_size_os: [usize; 2], kernel_width: f64) -> CollaboratorResult<()> {
        let channels = self.csm.as_ref().map(|c| c.dim().2);
        if channels.is_some() && channels == self.setup_fails_for {
            return Err(CollaboratorError::new("out of device memory"));
        }
        self.matrix = matrix_size;
        self.log.log().setups.push((matrix_size, matrix_size_os, kernel_width));
        Ok(())
    }

    fn set_csm(&mut self, csm: Array3<Complex32>) -> CollaboratorResult<()> {
        self.log.log().csm_channels.push(csm.dim().2);
        self.csm = Some(csm);
        Ok(())
    }

    fn csm(&self) -> Option<&Array3<Complex32>> {
        self.csm.as_ref()
    }

    fn set_dcw(&mut self, _dcw: Array1<f32>) {}

    fn preprocess(&mut self, _trajectory: &Array2<f32>) -> CollaboratorResult<()> {
        Ok(())
    }

    fn mult_csm_conj_sum(&self, _coil_images: &Array3<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        Ok(Array2::ones(self.matrix))
    }

    fn forward(&self, _image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        Err(CollaboratorError::new("not used"))
    }

    fn adjoint(&self, _samples: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        Err(CollaboratorError::new("not used"))
    }

    fn adjoint_coils(&self, samples: &Array2<Complex32>) -> CollaboratorResult<Array3<Complex32>> {
        let [nx, ny] = self.matrix;
        Ok(Array3::ones((nx, ny, samples.ncols())))
    }
}

struct MockRhs {
    log: Shared,
    acc: Option<Array3<Complex32>>,
}

impl RhsAccumulator for MockRhs {
    fn set_num_coils(&mut self, channels: usize) -> CollaboratorResult<()> {
        self.log.log().rhs_coils.push(channels);
        self.acc = None;
        Ok(())
    }

    fn add_frame(&mut self, encoding: &dyn EncodingOperator, samples: &Array2<Complex32>) -> CollaboratorResult<()> {
        self.acc = Some(encoding.adjoint_coils(samples)?);
        self.log.log().rhs_frames += 1;
        Ok(())
    }

    fn accumulated(&self) -> Option<Array3<Complex32>> {
        self.acc.clone()
    }

    fn clear(&mut self) {
        let mut log = self.log.log();
        log.rhs_clears += 1;
        log.rhs_frames = 0;
        self.acc = None;
    }
}

/// returns the accumulated coil images unchanged
struct MockCsm;

impl CsmEstimator for MockCsm {
    fn estimate(&mut self, coil_images: &Array3<Complex32>) -> CollaboratorResult<Array3<Complex32>> {
        Ok(coil_images.clone())
    }
}

/// constant weight image of 4
struct MockRegularization {
    log: Shared,
}

impl RegularizationOperator for MockRegularization {
    fn set_weight(&mut self, kappa: f64) {
        self.log.log().kappa = Some(kappa);
    }

    fn weight(&self) -> f64 {
        self.log.log().kappa.unwrap_or(0.)
    }

    fn compute(&mut self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<f32>> {
        Ok(Array2::from_elem(image.raw_dim(), 4.))
    }

    fn apply(&self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        Ok(image.clone())
    }
}

struct MockPreconditioner {
    log: Shared,
}

impl Preconditioner for MockPreconditioner {
    fn set_weights(&mut self, weights: Array2<Complex32>) -> CollaboratorResult<()> {
        self.log.log().precon_weights = Some(weights);
        Ok(())
    }

    fn apply(&self, residual: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        Ok(residual.clone())
    }
}

/// image whose pixels hold the number of solves so far
struct MockSolver {
    log: Shared,
    matrix: [usize; 2],
    returns_none: bool,
}

impl Solver for MockSolver {
    fn configure(&mut self, settings: SolverSettings) {
        self.log.log().solver_settings = Some(settings);
    }

    fn solve(&mut self, _system: &SenseSystem<'_>, _samples: &Array2<Complex32>) -> CollaboratorResult<Option<Array2<Complex32>>> {
        if self.returns_none {
            return Ok(None);
        }
        let mut log = self.log.log();
        log.solves += 1;
        Ok(Some(Array2::from_elem(self.matrix, Complex32::new(log.solves as f32, 0.))))
    }
}

pub fn mock_collaborators(matrix: [usize; 2], device_count: usize, faults: Faults) -> (Collaborators, Shared) {
    let log = Shared::default();
    let collab = Collaborators {
        device: Box::new(MockDevice { count: device_count, warp_size: 32, log: log.clone() }),
        trajectory: Box::new(MockTrajectory { log: log.clone(), fail: faults.trajectory }),
        density: Box::new(MockDensity { log: log.clone() }),
        encoding: Box::new(MockEncoding { log: log.clone(), matrix, csm: None, setup_fails_for: faults.setup_fails_for }),
        rhs: Box::new(MockRhs { log: log.clone(), acc: None }),
        csm: Box::new(MockCsm),
        regularization: Box::new(MockRegularization { log: log.clone() }),
        preconditioner: Box::new(MockPreconditioner { log: log.clone() }),
        solver: Box::new(MockSolver { log: log.clone(), matrix, returns_none: faults.solver_returns_none }),
    };
    (collab, log)
}

/// Profile whose samples encode (scan counter, channel, sample)
pub fn profile(scan_counter: u32, slice: u16, channels: usize, samples: usize, z: f32) -> AcquisitionProfile {
    let header = AcquisitionHeader {
        scan_counter,
        acquisition_time_stamp: 1000 + scan_counter,
        slice,
        active_channels: channels as u16,
        number_of_samples: samples as u16,
        position: [0., 0., z],
        quaternion: [0., 0., 0., 1.],
        patient_table_position: [0., 0., -z],
    };
    let data = Array2::from_shape_fn((channels, samples), |(c, s)| {
        Complex32::new(scan_counter as f32, (100 * c + s) as f32)
    });
    AcquisitionProfile::new(header, data).unwrap()
}
