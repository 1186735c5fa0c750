//! Host reference implementations of the numerical collaborators.
//!
//! Everything runs on the CPU with rayon. The encoding operator evaluates the non-uniform
//! Fourier transform directly rather than gridding, so cost grows with samples x pixels;
//! these are meant for small matrices, tests and offline replays of recorded streams.

mod cg;
mod csm;
mod density;
mod preconditioner;
mod regularization;
mod rhs;
mod sense;
mod trajectory;

pub use cg::ConjugateGradientSolver;
pub use csm::RssCsmEstimator;
pub use density::RampDensity;
pub use preconditioner::DiagonalPreconditioner;
pub use regularization::ImageWeightRegularizer;
pub use rhs::CoilImageAccumulator;
pub use sense::DirectSenseOperator;
pub use trajectory::{GoldenAngleRadial, GOLDEN_ANGLE};
