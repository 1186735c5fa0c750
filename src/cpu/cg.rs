use crate::collaborators::{SenseSystem, Solver, SolverSettings};
use crate::error::CollaboratorResult;
use log::{debug, info, warn};
use ndarray::{Array2, Zip};
use num_complex::Complex32;

/// Preconditioned conjugate gradient on the normal equations
/// `(EᴴWE + κRᴴR) x = EᴴW y`
#[derive(Debug, Clone, Default)]
pub struct ConjugateGradientSolver {
    settings: SolverSettings,
    /// iterations used by the last solve
    iterations: usize,
}

impl ConjugateGradientSolver {
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn dot(a: &Array2<Complex32>, b: &Array2<Complex32>) -> Complex32 {
    a.iter().zip(b.iter()).map(|(a, b)| a.conj() * b).sum()
}

fn norm(a: &Array2<Complex32>) -> f32 {
    a.iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt()
}

/// y += alpha * x
fn axpy(y: &mut Array2<Complex32>, alpha: Complex32, x: &Array2<Complex32>) {
    Zip::from(y).and(x).par_for_each(|y, &x| *y += alpha * x);
}

fn system_matrix(system: &SenseSystem<'_>, x: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
    let samples = system.encoding.forward(x)?;
    let mut ax = system.encoding.adjoint(&samples)?;
    ax += &system.regularization.apply(x)?;
    Ok(ax)
}

impl Solver for ConjugateGradientSolver {
    fn configure(&mut self, settings: SolverSettings) {
        self.settings = settings;
    }

    fn solve(&mut self, system: &SenseSystem<'_>, samples: &Array2<Complex32>) -> CollaboratorResult<Option<Array2<Complex32>>> {
        let rhs = system.encoding.adjoint(samples)?;
        let mut x = Array2::<Complex32>::zeros(rhs.raw_dim());
        self.iterations = 0;

        let rhs_norm = norm(&rhs);
        if !rhs_norm.is_finite() {
            return Ok(None);
        }
        if rhs_norm == 0. {
            return Ok(Some(x));
        }

        let mut r = rhs;
        let mut z = system.preconditioner.apply(&r)?;
        let mut p = z.clone();
        let mut rz = dot(&r, &z);

        for it in 0..self.settings.max_iterations {
            let ap = system_matrix(system, &p)?;
            let pap = dot(&p, &ap);
            if pap.norm() == 0. {
                break;
            }
            let alpha = rz / pap;
            axpy(&mut x, alpha, &p);
            axpy(&mut r, -alpha, &ap);
            self.iterations = it + 1;

            let residual = norm(&r) / rhs_norm;
            if self.settings.verbose {
                info!("iteration {}: relative residual {:.3e}", it + 1, residual);
            }
            if (residual as f64) < self.settings.tolerance {
                break;
            }

            z = system.preconditioner.apply(&r)?;
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            Zip::from(&mut p).and(&z).par_for_each(|p, &z| *p = z + beta * *p);
            rz = rz_next;
        }
        debug!("conjugate gradient finished after {} iterations", self.iterations);

        if x.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            warn!("conjugate gradient diverged");
            return Ok(None);
        }
        Ok(Some(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EncodingOperator, Preconditioner, RegularizationOperator};
    use crate::cpu::{DiagonalPreconditioner, DirectSenseOperator, ImageWeightRegularizer};
    use ndarray::{Array1, Array3, ShapeBuilder};

    /// fully sampled Cartesian grid, where EᴴE is the identity up to scale
    fn cartesian_system(n: usize) -> (DirectSenseOperator, ImageWeightRegularizer, DiagonalPreconditioner) {
        let k: Vec<f32> = (0..n).map(|i| (i as f32 - (n / 2) as f32) / n as f32).collect();
        let trajectory = Array2::from_shape_fn((n * n, 2), |(j, d)| if d == 0 { k[j / n] } else { k[j % n] });
        let mut op = DirectSenseOperator::default();
        op.setup([n, n], [2 * n, 2 * n], 5.5).unwrap();
        op.set_csm(Array3::from_elem((n, n, 1).f(), Complex32::ONE)).unwrap();
        op.set_dcw(Array1::from_elem(n * n, 1. / (n * n) as f32));
        op.preprocess(&trajectory).unwrap();

        let mut reg = ImageWeightRegularizer::default();
        reg.set_weight(0.);
        reg.compute(&Array2::from_elem((n, n), Complex32::ONE)).unwrap();
        let mut precon = DiagonalPreconditioner::default();
        precon.set_weights(Array2::from_elem((n, n), Complex32::ONE)).unwrap();
        (op, reg, precon)
    }

    #[test]
    fn recovers_image_from_full_sampling() {
        let n = 4;
        let (op, reg, precon) = cartesian_system(n);
        let truth = Array2::from_shape_fn((n, n), |(x, y)| Complex32::new(x as f32, y as f32 - 1.));
        let samples = op.forward(&truth).unwrap();

        let mut solver = ConjugateGradientSolver::default();
        solver.configure(SolverSettings { max_iterations: 10, tolerance: 1e-6, verbose: true });
        let system = SenseSystem { encoding: &op, regularization: &reg, preconditioner: &precon };
        let image = solver.solve(&system, &samples).unwrap().unwrap();
        for (a, b) in image.iter().zip(truth.iter()) {
            assert!((a - b).norm() < 1e-3, "{a} != {b}");
        }
        assert!(solver.iterations() >= 1);
    }

    #[test]
    fn zero_data_gives_zero_image() {
        let (op, reg, precon) = cartesian_system(2);
        let mut solver = ConjugateGradientSolver::default();
        let system = SenseSystem { encoding: &op, regularization: &reg, preconditioner: &precon };
        let image = solver.solve(&system, &Array2::zeros((4, 1))).unwrap().unwrap();
        assert!(image.iter().all(|v| *v == Complex32::ZERO));
    }

    #[test]
    fn non_finite_data_gives_no_image() {
        let (op, reg, precon) = cartesian_system(2);
        let mut solver = ConjugateGradientSolver::default();
        let system = SenseSystem { encoding: &op, regularization: &reg, preconditioner: &precon };
        let samples = Array2::from_elem((4, 1), Complex32::new(f32::NAN, 0.));
        assert!(solver.solve(&system, &samples).unwrap().is_none());
    }
}
