use crate::collaborators::{DensityCompensator, FrameWindow};
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array1, Array2, Axis};

/// Radial ramp density compensation, `w ∝ |k|`, normalized to sum to 1.
/// The centre sample, shared by every spoke, gets the weight of a quarter sample step.
#[derive(Debug, Clone, Default)]
pub struct RampDensity;

impl DensityCompensator for RampDensity {
    fn weights(&mut self, window: &FrameWindow<'_>, trajectory: &Array2<f32>) -> CollaboratorResult<Array1<f32>> {
        if trajectory.nrows() != window.total_samples() {
            return Err(CollaboratorError::new(format!(
                "trajectory has {} points, window {} samples",
                trajectory.nrows(),
                window.total_samples()
            )));
        }
        let floor = 0.25 / window.samples_per_profile().max(1) as f32;
        let mut weights = trajectory.map_axis(Axis(1), |k| k.iter().map(|v| v * v).sum::<f32>().sqrt().max(floor));
        let total = weights.sum();
        if total > 0. {
            weights /= total;
        }
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AcquisitionHeader, AcquisitionProfile};
    use ndarray::array;
    use num_complex::Complex32;

    #[test]
    fn weights_ramp_with_radius() {
        let header = AcquisitionHeader { active_channels: 1, number_of_samples: 4, ..Default::default() };
        let profiles = [AcquisitionProfile::from_vec(header, vec![Complex32::ZERO; 4]).unwrap()];
        let window = FrameWindow::new(profiles.iter(), 0, 4);
        let trajectory = array![[-0.5, 0.], [-0.25, 0.], [0., 0.], [0., 0.25]];
        let w = RampDensity.weights(&window, &trajectory).unwrap();
        assert!((w.sum() - 1.).abs() < 1e-6);
        assert!((w[0] / w[1] - 2.).abs() < 1e-5);
        assert!((w[3] / w[2] - 4.).abs() < 1e-5);
        assert!(RampDensity.weights(&window, &array![[0., 0.]]).is_err());
    }
}
