use crate::collaborators::CsmEstimator;
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array2, Array3, Axis, ShapeBuilder, Zip};
use num_complex::Complex32;

/// Coil sensitivities from box-smoothed coil images normalized by their root sum of squares
#[derive(Debug, Clone)]
pub struct RssCsmEstimator {
    /// half width of the smoothing box, 0 disables smoothing
    pub smoothing_radius: usize,
    /// relative magnitude below which a pixel's sensitivities are set to 0
    pub threshold: f32,
}

impl Default for RssCsmEstimator {
    fn default() -> Self {
        Self { smoothing_radius: 2, threshold: 1e-6 }
    }
}

fn box_smooth(image: ndarray::ArrayView2<Complex32>, radius: usize) -> Array2<Complex32> {
    let (nx, ny) = image.dim();
    Array2::from_shape_fn((nx, ny).f(), |(x, y)| {
        let xs = x.saturating_sub(radius)..(x + radius + 1).min(nx);
        let ys = y.saturating_sub(radius)..(y + radius + 1).min(ny);
        let count = (xs.len() * ys.len()) as f32;
        let window = image.slice(ndarray::s![xs, ys]);
        window.sum() / count
    })
}

impl CsmEstimator for RssCsmEstimator {
    fn estimate(&mut self, coil_images: &Array3<Complex32>) -> CollaboratorResult<Array3<Complex32>> {
        let (nx, ny, channels) = coil_images.dim();
        if channels == 0 || nx == 0 || ny == 0 {
            return Err(CollaboratorError::new(format!("no coil images to estimate from ({nx}x{ny}x{channels})")));
        }

        let mut csm = Array3::zeros((nx, ny, channels).f());
        Zip::from(csm.axis_iter_mut(Axis(2)))
            .and(coil_images.axis_iter(Axis(2)))
            .par_for_each(|mut out, coil| {
                if self.smoothing_radius > 0 {
                    out.assign(&box_smooth(coil, self.smoothing_radius));
                } else {
                    out.assign(&coil);
                }
            });

        let rss = csm.map_axis(Axis(2), |c| c.iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt());
        let peak = rss.iter().cloned().fold(0f32, f32::max);
        if !(peak > 0.) || !peak.is_finite() {
            return Err(CollaboratorError::new("coil images carry no signal"));
        }
        let floor = peak * self.threshold;
        Zip::from(csm.lanes_mut(Axis(2))).and(&rss).par_for_each(|mut coils, &r| {
            if r > floor {
                coils.mapv_inplace(|v| v / r);
            } else {
                coils.fill(Complex32::ZERO);
            }
        });
        Ok(csm)
    }
}
