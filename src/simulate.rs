//! Synthetic golden angle radial acquisitions of a disk phantom seen by a ring of coils.

use crate::collaborators::EncodingOperator;
use crate::cpu::{DirectSenseOperator, GoldenAngleRadial};
use crate::error::{ReconError, ReconStep, Result};
use crate::params::StreamHeader;
use crate::profile::{AcquisitionHeader, AcquisitionProfile};
use ndarray::{Array2, Array3, ShapeBuilder};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub matrix_size: [usize; 2],
    pub channels: usize,
    /// samples per profile, 0 for twice the matrix width
    pub samples_per_profile: usize,
    pub slice: u16,
    /// half width of the uniform noise added to every sample
    pub noise: f32,
    pub seed: u64,
    /// profile index from which the slice position moves by `shift_mm`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_change_at: Option<usize>,
    pub shift_mm: f32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            matrix_size: [32, 32],
            channels: 4,
            samples_per_profile: 0,
            slice: 0,
            noise: 0.,
            seed: 0,
            geometry_change_at: None,
            shift_mm: 5.,
        }
    }
}

impl SimulationSettings {
    pub fn samples(&self) -> usize {
        if self.samples_per_profile == 0 {
            2 * self.matrix_size[0]
        } else {
            self.samples_per_profile
        }
    }
}

/// Two nested disks of different intensity
pub fn disk_phantom(matrix_size: [usize; 2]) -> Array2<Complex32> {
    let [nx, ny] = matrix_size;
    let (cx, cy) = ((nx / 2) as f32, (ny / 2) as f32);
    let r = 0.35 * nx.min(ny) as f32;
    Array2::from_shape_fn((nx, ny).f(), |(x, y)| {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        if d < 0.4 * r {
            Complex32::new(2., 0.)
        } else if d < r {
            Complex32::new(1., 0.)
        } else {
            Complex32::ZERO
        }
    })
}

/// Smooth Gaussian coil profiles spread on a ring around the matrix, each with a linear phase
pub fn ring_coil_maps(matrix_size: [usize; 2], channels: usize) -> Array3<Complex32> {
    let [nx, ny] = matrix_size;
    let (cx, cy) = ((nx / 2) as f32, (ny / 2) as f32);
    let radius = 0.6 * nx.max(ny) as f32;
    let sigma = 0.5 * nx.max(ny) as f32;
    Array3::from_shape_fn((nx, ny, channels).f(), |(x, y, c)| {
        let theta = 2. * PI * c as f32 / channels as f32;
        let (px, py) = (cx + radius * theta.cos(), cy + radius * theta.sin());
        let d2 = (x as f32 - px).powi(2) + (y as f32 - py).powi(2);
        let magnitude = (-d2 / (2. * sigma * sigma)).exp();
        Complex32::from_polar(magnitude, theta + 0.02 * (x + y) as f32)
    })
}

pub struct PhantomSimulator {
    settings: SimulationSettings,
    phantom: Array2<Complex32>,
    operator: DirectSenseOperator,
    trajectory: GoldenAngleRadial,
    rng: StdRng,
    next: usize,
}

impl PhantomSimulator {
    pub fn new(settings: SimulationSettings) -> Result<Self> {
        let invalid = |parameter: &str, reason: &str| ReconError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        };
        if settings.matrix_size.contains(&0) {
            return Err(invalid("matrix_size", "must be non-zero"));
        }
        if settings.channels == 0 || settings.channels > u16::MAX as usize {
            return Err(invalid("channels", "must be between 1 and 65535"));
        }
        if settings.samples() > u16::MAX as usize {
            return Err(invalid("samples_per_profile", "must fit in 16 bits"));
        }
        if !(settings.noise >= 0.) {
            return Err(invalid("noise", "must be non-negative"));
        }

        let mut operator = DirectSenseOperator::default();
        operator
            .setup(settings.matrix_size, settings.matrix_size, 1.)
            .map_err(|e| ReconError::compute(ReconStep::Forward, e))?;
        operator
            .set_csm(ring_coil_maps(settings.matrix_size, settings.channels))
            .map_err(|e| ReconError::compute(ReconStep::Forward, e))?;

        Ok(Self {
            phantom: disk_phantom(settings.matrix_size),
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            operator,
            trajectory: GoldenAngleRadial::default(),
            next: 0,
        })
    }

    pub fn stream_header(&self) -> StreamHeader {
        StreamHeader::new(self.settings.matrix_size, Some(self.settings.channels))
    }

    pub fn phantom(&self) -> &Array2<Complex32> {
        &self.phantom
    }

    /// Acquires the next profile of the stream
    pub fn acquire(&mut self) -> Result<AcquisitionProfile> {
        let index = self.next;
        let n = self.settings.samples();
        let spoke = self.trajectory.spoke(index as u64, n);
        self.operator.set_dcw(ndarray::Array1::ones(n));
        self.operator
            .preprocess(&spoke)
            .map_err(|e| ReconError::compute(ReconStep::Forward, e))?;
        let samples = self
            .operator
            .forward(&self.phantom)
            .map_err(|e| ReconError::compute(ReconStep::Forward, e))?;

        let noise = self.settings.noise;
        let mut payload = samples.t().to_owned();
        if noise > 0. {
            payload.mapv_inplace(|v| {
                v + Complex32::new(self.rng.random_range(-noise..noise), self.rng.random_range(-noise..noise))
            });
        }

        let z = match self.settings.geometry_change_at {
            Some(at) if index >= at => self.settings.shift_mm,
            _ => 0.,
        };
        let header = AcquisitionHeader {
            scan_counter: index as u32,
            acquisition_time_stamp: index as u32,
            slice: self.settings.slice,
            active_channels: self.settings.channels as u16,
            number_of_samples: n as u16,
            position: [0., 0., z],
            quaternion: [0., 0., 0., 1.],
            patient_table_position: [0.; 3],
        };
        self.next += 1;
        AcquisitionProfile::new(header, payload)
    }
}

impl Iterator for PhantomSimulator {
    type Item = Result<AcquisitionProfile>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.acquire())
    }
}
