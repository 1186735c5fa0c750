use crate::collaborators::EncodingOperator;
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array1, Array2, Array3, Axis, ShapeBuilder, Zip};
use num_complex::Complex32;
use std::f32::consts::PI;

/// SENSE encoding with a directly evaluated non-uniform Fourier transform.
///
/// forward:  s_c(k_j) = Σ_r csm_c(r) x(r) exp(-i2π k_j·r)
/// adjoint:  x(r) = Σ_c conj(csm_c(r)) Σ_j w_j s_c(k_j) exp(i2π k_j·r)
///
/// Pixel coordinates are centred on the matrix. The exponential separates into per sample
/// x and y tables, which [preprocess](EncodingOperator::preprocess) builds from the trajectory.
#[derive(Debug, Default)]
pub struct DirectSenseOperator {
    matrix_size: Option<[usize; 2]>,
    matrix_size_os: [usize; 2],
    kernel_width: f64,
    csm: Option<Array3<Complex32>>,
    dcw: Option<Array1<f32>>,
    /// exp(-i2π kx_j x) as (samples, nx)
    phase_x: Option<Array2<Complex32>>,
    /// exp(-i2π ky_j y) as (samples, ny)
    phase_y: Option<Array2<Complex32>>,
}

fn phase_table(k: ndarray::ArrayView1<f32>, n: usize) -> Array2<Complex32> {
    let centre = (n / 2) as f32;
    Array2::from_shape_fn((k.len(), n), |(j, x)| Complex32::cis(-2. * PI * k[j] * (x as f32 - centre)))
}

impl DirectSenseOperator {
    pub fn matrix_size_os(&self) -> [usize; 2] {
        self.matrix_size_os
    }

    pub fn kernel_width(&self) -> f64 {
        self.kernel_width
    }

    fn matrix(&self) -> CollaboratorResult<[usize; 2]> {
        self.matrix_size.ok_or_else(|| CollaboratorError::new("encoding operator is not set up"))
    }

    fn tables(&self) -> CollaboratorResult<(&Array2<Complex32>, &Array2<Complex32>)> {
        match (&self.phase_x, &self.phase_y) {
            (Some(px), Some(py)) => Ok((px, py)),
            _ => Err(CollaboratorError::new("encoding operator has no trajectory")),
        }
    }

    fn sensitivities(&self) -> CollaboratorResult<&Array3<Complex32>> {
        self.csm.as_ref().ok_or_else(|| CollaboratorError::new("no coil sensitivities"))
    }

    fn check_image(&self, dim: (usize, usize)) -> CollaboratorResult<()> {
        let [nx, ny] = self.matrix()?;
        if dim != (nx, ny) {
            return Err(CollaboratorError::new(format!("image is {dim:?}, operator expects {:?}", (nx, ny))));
        }
        Ok(())
    }
}

impl EncodingOperator for DirectSenseOperator {
    fn setup(&mut self, matrix_size: [usize; 2], matrix_size_os: [usize; 2], kernel_width: f64) -> CollaboratorResult<()> {
        if matrix_size.contains(&0) {
            return Err(CollaboratorError::new(format!("empty matrix {matrix_size:?}")));
        }
        if self.matrix_size != Some(matrix_size) {
            self.phase_x = None;
            self.phase_y = None;
        }
        self.matrix_size = Some(matrix_size);
        self.matrix_size_os = matrix_size_os;
        self.kernel_width = kernel_width;
        Ok(())
    }

    fn set_csm(&mut self, csm: Array3<Complex32>) -> CollaboratorResult<()> {
        if let Some([nx, ny]) = self.matrix_size {
            let (cx, cy, _) = csm.dim();
            if (cx, cy) != (nx, ny) {
                return Err(CollaboratorError::new(format!("csm is {cx}x{cy}, matrix is {nx}x{ny}")));
            }
        }
        self.csm = Some(csm);
        Ok(())
    }

    fn csm(&self) -> Option<&Array3<Complex32>> {
        self.csm.as_ref()
    }

    fn set_dcw(&mut self, dcw: Array1<f32>) {
        self.dcw = Some(dcw);
    }

    fn preprocess(&mut self, trajectory: &Array2<f32>) -> CollaboratorResult<()> {
        let [nx, ny] = self.matrix()?;
        if trajectory.ncols() != 2 {
            return Err(CollaboratorError::new(format!("trajectory has {} dimensions, expected 2", trajectory.ncols())));
        }
        self.phase_x = Some(phase_table(trajectory.column(0), nx));
        self.phase_y = Some(phase_table(trajectory.column(1), ny));
        Ok(())
    }

    fn mult_csm_conj_sum(&self, coil_images: &Array3<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        let csm = self.sensitivities()?;
        if csm.dim() != coil_images.dim() {
            return Err(CollaboratorError::new(format!(
                "coil images are {:?}, csm is {:?}",
                coil_images.dim(),
                csm.dim()
            )));
        }
        let (nx, ny, _) = csm.dim();
        let mut combined = Array2::zeros((nx, ny).f());
        Zip::from(&mut combined)
            .and(csm.lanes(Axis(2)))
            .and(coil_images.lanes(Axis(2)))
            .par_for_each(|out, s, img| {
                *out = s.iter().zip(img.iter()).map(|(s, i)| s.conj() * i).sum();
            });
        Ok(combined)
    }

    fn forward(&self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        self.check_image(image.dim())?;
        let csm = self.sensitivities()?;
        let (px, py) = self.tables()?;
        let channels = csm.len_of(Axis(2));
        let n_samples = px.nrows();

        let mut samples = Array2::zeros((n_samples, channels).f());
        for (c, mut column) in samples.axis_iter_mut(Axis(1)).enumerate() {
            let coil = &csm.index_axis(Axis(2), c) * image;
            Zip::from(&mut column)
                .and(px.rows())
                .and(py.rows())
                .par_for_each(|s, ex, ey| {
                    let mut acc = Complex32::ZERO;
                    for (x, row) in coil.outer_iter().enumerate() {
                        let inner: Complex32 = row.iter().zip(ey.iter()).map(|(v, e)| v * e).sum();
                        acc += ex[x] * inner;
                    }
                    *s = acc;
                });
        }
        Ok(samples)
    }

    fn adjoint(&self, samples: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        let coils = self.adjoint_coils(samples)?;
        self.mult_csm_conj_sum(&coils)
    }

    fn adjoint_coils(&self, samples: &Array2<Complex32>) -> CollaboratorResult<Array3<Complex32>> {
        let [nx, ny] = self.matrix()?;
        let (px, py) = self.tables()?;
        let (n_samples, channels) = samples.dim();
        if n_samples != px.nrows() {
            return Err(CollaboratorError::new(format!(
                "{n_samples} samples for a trajectory of {}",
                px.nrows()
            )));
        }
        let dcw = self.dcw.as_ref().ok_or_else(|| CollaboratorError::new("no density compensation weights"))?;
        if dcw.len() != n_samples {
            return Err(CollaboratorError::new(format!("{} weights for {n_samples} samples", dcw.len())));
        }

        let mut coils = Array3::zeros((nx, ny, channels).f());
        for (c, mut coil) in coils.axis_iter_mut(Axis(2)).enumerate() {
            let weighted: Array1<Complex32> = Zip::from(samples.column(c)).and(dcw).map_collect(|&s, &w| s * w);
            Zip::indexed(&mut coil).par_for_each(|(x, y), v| {
                *v = weighted
                    .iter()
                    .zip(px.column(x).iter().zip(py.column(y).iter()))
                    .map(|(s, (ex, ey))| s * (ex * ey).conj())
                    .sum();
            });
        }
        Ok(coils)
    }
}
