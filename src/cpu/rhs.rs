use crate::collaborators::{EncodingOperator, RhsAccumulator};
use crate::error::{CollaboratorError, CollaboratorResult};
use ndarray::{Array2, Array3, Axis};
use num_complex::Complex32;

/// Running mean of per coil adjoint images over all frames since the last clear
#[derive(Debug, Default)]
pub struct CoilImageAccumulator {
    channels: usize,
    sum: Option<Array3<Complex32>>,
    frames: usize,
}

impl CoilImageAccumulator {
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl RhsAccumulator for CoilImageAccumulator {
    fn set_num_coils(&mut self, channels: usize) -> CollaboratorResult<()> {
        if channels == 0 {
            return Err(CollaboratorError::new("at least one coil is needed"));
        }
        if channels != self.channels {
            self.clear();
        }
        self.channels = channels;
        Ok(())
    }

    fn add_frame(&mut self, encoding: &dyn EncodingOperator, samples: &Array2<Complex32>) -> CollaboratorResult<()> {
        if samples.len_of(Axis(1)) != self.channels {
            return Err(CollaboratorError::new(format!(
                "frame has {} coils, accumulating {}",
                samples.len_of(Axis(1)),
                self.channels
            )));
        }
        let coils = encoding.adjoint_coils(samples)?;
        match self.sum.as_mut() {
            Some(sum) if sum.dim() == coils.dim() => *sum += &coils,
            _ => self.sum = Some(coils),
        }
        self.frames += 1;
        Ok(())
    }

    fn accumulated(&self) -> Option<Array3<Complex32>> {
        let sum = self.sum.as_ref()?;
        Some(sum.mapv(|v| v / self.frames as f32))
    }

    fn clear(&mut self) {
        self.sum = None;
        self.frames = 0;
    }
}
