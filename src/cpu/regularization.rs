use crate::collaborators::RegularizationOperator;
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array2, Zip};
use num_complex::Complex32;

/// Image weighted Tikhonov regularization.
///
/// Weights are `1 / (|m|² / max|m|² + offset)` for a coil combined reference image `m`, so
/// pixels without signal are pulled towards zero hardest. The weight image is the diagonal
/// of RᴴR.
#[derive(Debug, Clone)]
pub struct ImageWeightRegularizer {
    kappa: f64,
    pub offset: f32,
    weights: Option<Array2<f32>>,
}

impl Default for ImageWeightRegularizer {
    fn default() -> Self {
        Self { kappa: 0., offset: 0.1, weights: None }
    }
}

impl ImageWeightRegularizer {
    pub fn weights(&self) -> Option<&Array2<f32>> {
        self.weights.as_ref()
    }
}

impl RegularizationOperator for ImageWeightRegularizer {
    fn set_weight(&mut self, kappa: f64) {
        self.kappa = kappa;
    }

    fn weight(&self) -> f64 {
        self.kappa
    }

    fn compute(&mut self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<f32>> {
        let magnitude = image.mapv(|v| v.norm_sqr());
        let peak = magnitude.iter().cloned().fold(0f32, f32::max);
        if !peak.is_finite() {
            return Err(CollaboratorError::new("reference image is not finite"));
        }
        let scale = if peak > 0. { peak.recip() } else { 0. };
        let offset = self.offset;
        let weights = magnitude.mapv(|m| (m * scale + offset).recip());
        self.weights = Some(weights.clone());
        Ok(weights)
    }

    fn apply(&self, image: &Array2<Complex32>) -> CollaboratorResult<Array2<Complex32>> {
        let weights = self.weights.as_ref().ok_or_else(|| CollaboratorError::new("regularization weights not computed"))?;
        if weights.dim() != image.dim() {
            return Err(CollaboratorError::new(format!(
                "image is {:?}, weights {:?}",
                image.dim(),
                weights.dim()
            )));
        }
        let kappa = self.kappa as f32;
        Ok(Zip::from(image).and(weights).par_map_collect(|&v, &w| v * (kappa * w)))
    }
}
