use crate::collaborators::{FrameWindow, TrajectoryCalculator};
use crate::error::CollaboratorResult;
use ndarray::{s, Array2};

/// Golden ratio angle increment between consecutive radial profiles
pub const GOLDEN_ANGLE: f64 = std::f64::consts::PI * 0.618_033_988_749_895;

/// 2D radial trajectory where the profile with stream ordinal `n` is rotated by `n * angle_step`.
/// Each spoke runs through the k-space centre with samples at `(s - N/2) / N`.
#[derive(Debug, Clone)]
pub struct GoldenAngleRadial {
    pub angle_step: f64,
}

impl Default for GoldenAngleRadial {
    fn default() -> Self {
        Self { angle_step: GOLDEN_ANGLE }
    }
}

impl GoldenAngleRadial {
    pub fn angle(&self, ordinal: u64) -> f64 {
        (ordinal as f64 * self.angle_step).rem_euclid(std::f64::consts::PI)
    }

    /// k-space points of a single spoke with `n` samples, as (n, 2)
    pub fn spoke(&self, ordinal: u64, n: usize) -> Array2<f32> {
        let (sin, cos) = self.angle(ordinal).sin_cos();
        Array2::from_shape_fn((n, 2), |(s, d)| {
            let k = (s as f64 - (n / 2) as f64) / n as f64;
            (if d == 0 { k * cos } else { k * sin }) as f32
        })
    }
}

impl TrajectoryCalculator for GoldenAngleRadial {
    fn trajectory(&mut self, window: &FrameWindow<'_>) -> CollaboratorResult<Array2<f32>> {
        let n = window.samples_per_profile();
        let mut trajectory = Array2::zeros((window.total_samples(), 2));
        for slot in 0..window.len() {
            trajectory
                .slice_mut(s![slot * n..(slot + 1) * n, ..])
                .assign(&self.spoke(window.ordinal(slot), n));
        }
        Ok(trajectory)
    }
}
