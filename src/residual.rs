//! Scattered samples of the residual log bias field
//!
//! residual = observed - corrected, evaluated per foreground voxel with the
//! sharpened intensity mapping. The residual is the local estimate of the
//! part of the log bias field still present in the working image.

use rayon::prelude::*;

use crate::bspline::ScatteredSample;
use crate::sharpen::IntensityMapping;

/// One sample per foreground voxel
///
/// # Arguments
/// * `log_values` - Current log intensities of the foreground voxels
/// * `positions` - Continuous full-resolution voxel index of each voxel
/// * `mapping` - Observed-to-corrected mapping from the sharpener
pub fn sample_residual_field(
    log_values: &[f64],
    positions: &[[f64; 3]],
    mapping: &IntensityMapping,
) -> Vec<ScatteredSample> {
    debug_assert_eq!(log_values.len(), positions.len());
    log_values
        .par_iter()
        .zip(positions.par_iter())
        .map(|(&v, &position)| ScatteredSample {
            position,
            value: v - mapping.corrected(v),
        })
        .collect()
}
