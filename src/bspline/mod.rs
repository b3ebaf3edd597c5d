//! Tensor-product B-spline fields
//!
//! - `basis`: uniform B-spline basis and knot-doubling subdivision
//! - `lattice`: control point lattice, parametric mapping, refinement
//! - `fit`: multi-level scattered-data approximation
//! - `evaluate`: point, gradient and bulk grid evaluation
//!
//! Reference:
//! Lee, S., Wolberg, G., Shin, S.Y. (1997).
//! "Scattered data interpolation with multilevel B-splines."
//! IEEE Transactions on Visualization and Computer Graphics, 3(3):228-244.

pub mod basis;
pub mod lattice;
pub mod fit;
pub mod evaluate;

pub use lattice::ControlPointLattice;
pub use fit::BSplineFitter;

/// A scalar observation at a continuous voxel index of the domain image
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScatteredSample {
    pub position: [f64; 3],
    pub value: f64,
}
