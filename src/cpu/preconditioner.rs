use crate::collaborators::Preconditioner;
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array2, Zip};
use num_complex::Complex32;

/// Diagonal preconditioner. The stored weights are `1/sqrt(d)` for the diagonal `d` of the
/// system matrix, so applying it multiplies by `|w|²`.
#[derive(Debug, Clone, Default)]
pub struct DiagonalPreconditioner {
    weights: Option<Array2<Complex32>>,
}

impl DiagonalPreconditioner {
    pub fn weights(&self) -> Option<&Array2<Complex32>> {
        self.weights.as_ref()
    }
}

impl Preconditioner for DiagonalPreconditioner {
    fn set_weights(&mut self, weights: Array2<Complex32>) -> CollaboratorResult<()> {
        self.weights = Some(weights);
        Ok(())
    }

    fn apply(&self, residual: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        let weights = self.weights.as_ref().ok_or_else(|| CollaboratorError::new("preconditioner weights not set"))?;
        if weights.dim() != residual.dim() {
            return Err(CollaboratorError::new(format!(
                "residual is {:?}, weights {:?}",
                residual.dim(),
                weights.dim()
            )));
        }
        Ok(Zip::from(residual).and(weights).par_map_collect(|&r, w| r * w.norm_sqr()))
    }
}
