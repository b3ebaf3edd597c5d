//! N3-Core: nonparametric nonuniform intensity normalization
//!
//! This crate estimates and removes the smooth multiplicative bias field of
//! MR images with the N3 algorithm (Sled et al. 1998).
//!
//! # Modules
//! - `image`: Volume buffers, geometry, shrinking and simple masks
//! - `params`: Algorithm parameters and validation
//! - `fft`: 1D FFT operations using rustfft
//! - `histogram`: Log-intensity histogram with linear splatting
//! - `sharpen`: Wiener deconvolution of the histogram
//! - `residual`: Residual log bias field samples
//! - `bspline`: Control point lattices, multi-level B-spline fitting
//! - `convergence`: Coefficient of variation tracking
//! - `n3`: Iteration driver and entry points
//! - `correction`: Bias field reconstruction at full resolution

// Core modules
pub mod error;
pub mod image;
pub mod params;
pub mod fft;

// Algorithm modules
pub mod histogram;
pub mod sharpen;
pub mod residual;
pub mod bspline;
pub mod convergence;
pub mod n3;
pub mod correction;

pub use bspline::{BSplineFitter, ControlPointLattice, ScatteredSample};
pub use correction::{correct_image, reconstruct_bias_field, reconstruct_log_bias_field};
pub use error::{N3Error, Result};
pub use image::{ImageGeometry, MaskImage, ScalarImage};
pub use n3::{
    n3_bias_correction, n3_bias_correction_with_progress, IterationDriver, IterationEvent,
    N3Output, Termination,
};
pub use params::N3Params;
