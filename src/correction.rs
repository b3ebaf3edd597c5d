//! Bias field reconstruction and application
//!
//! The accumulated lattice describes the log bias field over the full
//! resolution grid, whatever shrink factor was used while fitting.

use rayon::prelude::*;

use crate::bspline::ControlPointLattice;
use crate::error::{N3Error, Result};
use crate::image::{ImageGeometry, ScalarImage};

fn check_domain(lattice: &ControlPointLattice, geometry: &ImageGeometry) -> Result<()> {
    if lattice.domain() != geometry.dims {
        return Err(N3Error::Domain(format!(
            "lattice covers {:?} voxels but image has {:?}",
            lattice.domain(),
            geometry.dims
        )));
    }
    Ok(())
}

/// Log bias field on every voxel of `geometry`
pub fn reconstruct_log_bias_field(
    lattice: &ControlPointLattice,
    geometry: &ImageGeometry,
) -> Result<ScalarImage> {
    check_domain(lattice, geometry)?;
    Ok(lattice.evaluate_image(geometry))
}

/// Multiplicative bias field exp(log field) on every voxel of `geometry`
pub fn reconstruct_bias_field(
    lattice: &ControlPointLattice,
    geometry: &ImageGeometry,
) -> Result<ScalarImage> {
    let mut field = reconstruct_log_bias_field(lattice, geometry)?;
    field.data.par_iter_mut().for_each(|v| *v = v.exp());
    Ok(field)
}

/// Divide `image` by the bias field described by `lattice`
///
/// Every voxel is corrected, foreground or not. Non-finite input voxels
/// stay non-finite; only a non-finite field is an error. The result keeps
/// the input geometry.
pub fn correct_image(image: &ScalarImage, lattice: &ControlPointLattice) -> Result<ScalarImage> {
    let log_field = reconstruct_log_bias_field(lattice, &image.geometry)?;
    if let Some(i) = log_field.data.iter().position(|f| !f.is_finite()) {
        return Err(N3Error::NumericalInstability(format!(
            "log bias field is non-finite at voxel {}",
            i
        )));
    }

    let data: Vec<f64> = image
        .data
        .par_iter()
        .zip(log_field.data.par_iter())
        .map(|(&v, &f)| v / f.exp())
        .collect();
    Ok(ScalarImage { geometry: image.geometry.clone(), data })
}
