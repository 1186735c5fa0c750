//! Sliding window SENSE reconstruction stage.
//!
//! A stage is bound to one slice. Profiles for that slice are buffered; once the buffer holds
//! `profiles_per_frame` of them, the newest `profiles_per_frame` profiles are reconstructed
//! into one image and the window slides forward, keeping `shared_profiles` profiles to seed
//! the next frame.
//!
//! All methods take `&mut self`, so profile processing and parameter updates on one stage
//! are always serialized. [crate::actor::StageActor] moves a stage onto its own thread for
//! callers that need to reach it from several threads.

use crate::collaborators::{Collaborators, FrameWindow, SenseSystem, SolverSettings};
use crate::device::{oversampled_matrix, select_device};
use crate::error::{CollaboratorError, ReconError, ReconStep, Result};
use crate::params::{DcwPolicy, StageParameters, StreamHeader};
use crate::profile::{AcquisitionProfile, ImageHeader, ImageResult, StageOutput};
use crate::profile_buffer::ProfileBuffer;
use crate::reconfigure::ReconfigurationDetector;
use crate::sink::Downstream;
use crate::staging::HostStagingBuffer;
use log::{debug, info, trace, warn};
use ndarray::{Array2, Array3, Axis, ShapeBuilder, Zip};
use num_complex::Complex32;

/// Where the stage is in the life of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingProfiles,
    AssemblingFrame,
    ReconstructingFrame,
    Emitting,
    Slid,
}

fn enter(state: &mut FrameState, next: FrameState) {
    trace!("frame state {:?} -> {:?}", state, next);
    *state = next;
}

/// Layout fixed at configuration time plus the drift tracking that follows it
#[derive(Debug, Clone)]
struct ActiveLayout {
    device_index: usize,
    matrix_size: [usize; 2],
    /// matrix size as carried in image headers
    image_dims: [u16; 2],
    matrix_size_os: [usize; 2],
    detector: ReconfigurationDetector,
}

pub struct SenseStage<D: Downstream> {
    params: StageParameters,
    collab: Collaborators,
    downstream: D,
    buffer: ProfileBuffer,
    staging: HostStagingBuffer,
    layout: Option<ActiveLayout>,
    state: FrameState,
    halted: bool,
    /// density weights installed in the encoding operator are still valid
    dcw_valid: bool,
    /// profiles drained since stream start
    profile_offset: u64,
    image_counter: u32,
}

impl<D: Downstream> SenseStage<D> {
    pub fn new(params: StageParameters, collaborators: Collaborators, downstream: D) -> Self {
        Self {
            params,
            collab: collaborators,
            downstream,
            buffer: ProfileBuffer::new(),
            staging: HostStagingBuffer::new(),
            layout: None,
            state: FrameState::AwaitingProfiles,
            halted: false,
            dcw_valid: false,
            profile_offset: 0,
            image_counter: 0,
        }
    }

    pub fn parameters(&self) -> &StageParameters {
        &self.params
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.layout.is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn buffered_profiles(&self) -> usize {
        self.buffer.len()
    }

    /// number of images produced so far, also the index of the last one
    pub fn images_reconstructed(&self) -> u32 {
        self.image_counter
    }

    pub fn profile_offset(&self) -> u64 {
        self.profile_offset
    }

    pub fn device_index(&self) -> Option<usize> {
        self.layout.as_ref().map(|l| l.device_index)
    }

    pub fn matrix_size(&self) -> Option<[usize; 2]> {
        self.layout.as_ref().map(|l| l.matrix_size)
    }

    pub fn matrix_size_os(&self) -> Option<[usize; 2]> {
        self.layout.as_ref().map(|l| l.matrix_size_os)
    }

    pub fn channels(&self) -> Option<usize> {
        self.layout.as_ref().map(|l| l.detector.channels())
    }

    pub fn samples_per_profile(&self) -> Option<usize> {
        self.layout.as_ref().map(|l| l.detector.samples_per_profile())
    }

    /// per channel capacity of the host staging buffer
    pub fn staged_samples_capacity(&self) -> usize {
        self.staging.allocated_samples()
    }

    pub fn staging(&self) -> &HostStagingBuffer {
        &self.staging
    }

    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    pub fn downstream_mut(&mut self) -> &mut D {
        &mut self.downstream
    }

    pub fn into_downstream(self) -> D {
        self.downstream
    }

    fn halt_on(&mut self, err: ReconError) -> ReconError {
        if err.halts_stage() {
            warn!("halting stage for slice {}: {err}", self.params.slice);
            self.halted = true;
        }
        err
    }

    /// Processes the stream header. Static parameters are applied once; calling this again
    /// on a configured stage only re-validates the header.
    pub fn configure(&mut self, header: &StreamHeader) -> Result<()> {
        if self.halted {
            return Err(ReconError::Halted);
        }
        self.try_configure(header).map_err(|e| self.halt_on(e))
    }

    fn try_configure(&mut self, header: &StreamHeader) -> Result<()> {
        let space = header.encoding_space()?;
        if self.layout.is_some() {
            debug!("stage for slice {} already configured", self.params.slice);
            return Ok(());
        }

        self.params.validate()?;
        self.params.clamp_shared_profiles();

        let (device_index, props) = select_device(self.collab.device.as_mut(), self.params.device)?;

        let matrix_size = [space.encoded_space.x, space.encoded_space.y];
        let image_dims = match matrix_size.map(u16::try_from) {
            [Ok(x), Ok(y)] => [x, y],
            _ => return Err(ReconError::MatrixTooLarge { x: matrix_size[0], y: matrix_size[1] }),
        };
        let matrix_size_os = oversampled_matrix(matrix_size, self.params.oversampling, props.warp_size);
        info!("matrix size: {:?}, oversampled: {:?}", matrix_size, matrix_size_os);
        info!("using device {device_index} for slice {}", self.params.slice);

        self.collab.regularization.set_weight(self.params.kappa);
        self.collab.solver.configure(SolverSettings {
            max_iterations: self.params.number_of_iterations,
            tolerance: self.params.cg_limit,
            verbose: false,
        });

        let channels = header.receiver_channels();
        configure_channels(&mut self.collab, channels, matrix_size, matrix_size_os, self.params.kernel_width)?;

        self.layout = Some(ActiveLayout {
            device_index,
            matrix_size,
            image_dims,
            matrix_size_os,
            detector: ReconfigurationDetector::new(channels, space.encoded_space.x),
        });
        self.dcw_valid = false;
        Ok(())
    }

    /// Accepts one profile. Reconstructs and emits an image when the window is full.
    pub fn process(&mut self, profile: AcquisitionProfile) -> Result<()> {
        if self.halted {
            return Err(ReconError::Halted);
        }
        let Some(layout) = self.layout.as_mut() else {
            warn!("data received before configuration complete");
            return Err(ReconError::NotConfigured);
        };

        if profile.header.slice != self.params.slice {
            return self.pass_on(profile);
        }

        let drift = layout.detector.observe(&profile.header);
        let (matrix_size, matrix_size_os) = (layout.matrix_size, layout.matrix_size_os);
        let channels = layout.detector.channels();

        if drift.invalidates_staging() {
            self.staging.invalidate();
            self.dcw_valid = false;
        }
        if drift.channels_changed {
            if let Err(e) = configure_channels(&mut self.collab, channels, matrix_size, matrix_size_os, self.params.kernel_width) {
                return Err(self.halt_on(e));
            }
        }
        if drift.geometry_changed {
            // sensitivity estimates must not mix slice positions
            self.collab.rhs.clear();
            self.dcw_valid = false;
        }

        self.buffer.push_back(profile);

        if self.buffer.len() >= self.params.profiles_per_frame {
            let result = self.reconstruct_frame();
            // a failed frame is consumed like a successful one, it is never retried
            match &result {
                Err(e) if e.halts_stage() => {}
                Err(e) => {
                    debug!("slice {}: frame dropped: {e}", self.params.slice);
                    self.slide_window();
                }
                Ok(()) => self.slide_window(),
            }
            enter(&mut self.state, FrameState::AwaitingProfiles);
            result.map_err(|e| self.halt_on(e))?;
        }
        Ok(())
    }

    /// Drains the profiles not shared with the next frame
    fn slide_window(&mut self) {
        let drained = self.buffer.drain_front(self.params.profiles_to_drain());
        self.profile_offset += drained as u64;
        enter(&mut self.state, FrameState::Slid);
        debug!("slice {}: {} profiles retained", self.params.slice, self.buffer.len());
    }

    fn pass_on(&mut self, profile: AcquisitionProfile) -> Result<()> {
        if self.params.pass_on_undesired_data {
            self.downstream
                .put(StageOutput::Profile(profile))
                .map_err(|e| ReconError::Rejected { what: "profile", reason: e.reason })
        } else {
            debug!("dropping slice {}", profile.header.slice);
            Ok(())
        }
    }

    fn reconstruct_frame(&mut self) -> Result<()> {
        let ppf = self.params.profiles_per_frame;
        let kappa = self.params.kappa;
        let Some(layout) = self.layout.as_ref() else {
            return Err(ReconError::NotConfigured);
        };
        let channels = layout.detector.channels();
        let samples_per_profile = layout.detector.samples_per_profile();
        let matrix_size = layout.matrix_size;
        let image_dims = layout.image_dims;

        enter(&mut self.state, FrameState::AssemblingFrame);
        let (start, newest) = self.buffer.newest(ppf);
        let window = FrameWindow::new(newest, self.profile_offset + start as u64, samples_per_profile);

        let trajectory = self
            .collab
            .trajectory
            .trajectory(&window)
            .map_err(|e| ReconError::compute(ReconStep::Trajectory, e))?;
        if trajectory.nrows() != window.total_samples() {
            return Err(ReconError::compute(
                ReconStep::Trajectory,
                CollaboratorError::new(format!(
                    "{} trajectory points for {} samples",
                    trajectory.nrows(),
                    window.total_samples()
                )),
            ));
        }

        let recompute_dcw = match self.params.dcw_policy {
            DcwPolicy::EveryFrame => true,
            DcwPolicy::PerGeometry => !self.dcw_valid,
        };
        if recompute_dcw {
            let dcw = self
                .collab
                .density
                .weights(&window, &trajectory)
                .map_err(|e| ReconError::compute(ReconStep::DensityCompensation, e))?;
            self.collab.encoding.set_dcw(dcw);
            self.dcw_valid = self.params.dcw_policy == DcwPolicy::PerGeometry;
        }

        self.staging.ensure(channels, window.total_samples())?;
        self.staging.stage_window(&window)?;
        let device_samples = self
            .collab
            .device
            .upload(self.staging.as_slice(), (self.staging.allocated_samples(), channels))
            .map_err(|e| ReconError::compute(ReconStep::Upload, e))?;

        self.collab
            .encoding
            .preprocess(&trajectory)
            .map_err(|e| ReconError::compute(ReconStep::Preprocess, e))?;

        enter(&mut self.state, FrameState::ReconstructingFrame);
        self.collab
            .rhs
            .add_frame(self.collab.encoding.as_ref(), &device_samples)
            .map_err(|e| ReconError::compute(ReconStep::Accumulate, e))?;
        let coil_images = self.collab.rhs.accumulated().ok_or_else(|| {
            ReconError::compute(ReconStep::Accumulate, CollaboratorError::new("no accumulated coil images"))
        })?;

        let csm = self
            .collab
            .csm
            .estimate(&coil_images)
            .map_err(|e| ReconError::compute(ReconStep::CsmEstimation, e))?;
        let (nx, ny, _) = csm.dim();
        let csm_power = coil_power(&csm);
        self.collab
            .encoding
            .set_csm(csm)
            .map_err(|e| ReconError::compute(ReconStep::CsmEstimation, e))?;

        let reg_image = self
            .collab
            .encoding
            .mult_csm_conj_sum(&coil_images)
            .map_err(|e| ReconError::compute(ReconStep::CoilCombine, e))?;

        let reg_weights = self
            .collab
            .regularization
            .compute(&reg_image)
            .map_err(|e| ReconError::compute(ReconStep::Regularization, e))?;

        let precon_weights = preconditioner_weights(&csm_power, &reg_weights, kappa).ok_or_else(|| {
            ReconError::compute(
                ReconStep::Preconditioner,
                CollaboratorError::new(format!(
                    "regularization weights {:?} do not match csm {:?}",
                    reg_weights.dim(),
                    (nx, ny)
                )),
            )
        })?;
        self.collab
            .preconditioner
            .set_weights(precon_weights)
            .map_err(|e| ReconError::compute(ReconStep::Preconditioner, e))?;

        let system = SenseSystem {
            encoding: self.collab.encoding.as_ref(),
            regularization: self.collab.regularization.as_ref(),
            preconditioner: self.collab.preconditioner.as_ref(),
        };
        let image = self
            .collab
            .solver
            .solve(&system, &device_samples)
            .map_err(|e| ReconError::compute(ReconStep::Solve, e))?
            .ok_or(ReconError::NoSolution)?;
        if image.dim() != (matrix_size[0], matrix_size[1]) {
            return Err(ReconError::compute(
                ReconStep::Solve,
                CollaboratorError::new(format!("solver image is {:?}, expected {:?}", image.dim(), matrix_size)),
            ));
        }

        enter(&mut self.state, FrameState::Emitting);
        let anchor = window.anchor().ok_or(ReconError::NotConfigured)?;
        self.image_counter += 1;
        let mut header = ImageHeader::from_anchor(&anchor.header, image_dims);
        header.image_index = self.image_counter;
        header.image_series_index = self.params.image_series;
        self.downstream
            .put(StageOutput::Image(ImageResult { header, data: image }))
            .map_err(|e| ReconError::Rejected { what: "image", reason: e.reason })?;
        debug!("slice {}: image {} reconstructed", self.params.slice, self.image_counter);
        Ok(())
    }

    /// Live parameter update. Only `profiles_per_frame` is recognized, other names are ignored.
    pub fn parameter_changed(&mut self, name: &str, new_value: &str, old_value: &str) -> Result<()> {
        debug!("changing parameter {name}: {old_value} -> {new_value}");
        match name {
            "profiles_per_frame" => {
                let profiles_per_frame = new_value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| ReconError::InvalidParameter { parameter: name.to_string(), reason: e.to_string() })?;
                if profiles_per_frame == 0 {
                    return Err(ReconError::InvalidParameter {
                        parameter: name.to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                self.params.profiles_per_frame = profiles_per_frame;
                self.params.clamp_shared_profiles();
                self.dcw_valid = false;
            }
            _ => debug!("ignoring unrecognized parameter {name}"),
        }
        Ok(())
    }
}

/// Installs a unit sensitivity map for `channels` coils, re-sets up the encoding operator and
/// resizes the accumulation buffer
fn configure_channels(
    collab: &mut Collaborators,
    channels: usize,
    matrix_size: [usize; 2],
    matrix_size_os: [usize; 2],
    kernel_width: f64,
) -> Result<()> {
    let rebuild = |source: CollaboratorError| ReconError::OperatorRebuild { channels, source };
    let [nx, ny] = matrix_size;
    let csm = Array3::from_elem((nx, ny, channels).f(), Complex32::ONE);
    collab.encoding.set_csm(csm).map_err(rebuild)?;
    collab.encoding.setup(matrix_size, matrix_size_os, kernel_width).map_err(rebuild)?;
    collab.rhs.set_num_coils(channels).map_err(rebuild)?;
    debug!("configured collaborators for {channels} channels");
    Ok(())
}

/// sum over coils of |csm|²
pub fn coil_power(csm: &Array3<Complex32>) -> Array2<f32> {
    let (nx, ny, _) = csm.dim();
    let mut power = Array2::zeros((nx, ny).f());
    Zip::from(&mut power).and(csm.lanes(Axis(2))).par_for_each(|p, coils| {
        *p = coils.iter().map(|c| c.norm_sqr()).sum();
    });
    power
}

/// Preconditioner weights `1 / sqrt(Σ|csm|² + kappa * reg_weights)` as a complex image.
/// Pixels where the sum vanishes get weight 0. None if the shapes disagree.
pub fn preconditioner_weights(csm_power: &Array2<f32>, reg_weights: &Array2<f32>, kappa: f64) -> Option<Array2<Complex32>> {
    if csm_power.dim() != reg_weights.dim() {
        return None;
    }
    let kappa = kappa as f32;
    let mut weights = Array2::zeros(csm_power.raw_dim().f());
    Zip::from(&mut weights).and(csm_power).and(reg_weights).par_for_each(|w, &p, &r| {
        let v = p + kappa * r;
        *w = if v > 0. && v.is_finite() { Complex32::new(v.sqrt().recip(), 0.) } else { Complex32::ZERO };
    });
    Some(weights)
}
