//! Parameters for N3 bias field correction

use crate::error::{N3Error, Result};

/// Parameters for N3 bias field correction
///
/// Defaults follow Sled et al. (1998) as used in common N3 deployments.
#[derive(Clone, Debug, PartialEq)]
pub struct N3Params {
    /// Iteration cap (default 50). Zero returns the input unchanged.
    pub max_iterations: usize,
    /// B-spline hierarchy depth per axis (default 4)
    pub fitting_levels: [usize; 3],
    /// B-spline order (default 3, cubic)
    pub spline_order: usize,
    /// Control points per axis at the first fitting level.
    /// `None` uses the minimum lattice, `spline_order + 1` per axis.
    pub control_points: Option<[usize; 3]>,
    /// Treat an axis as periodic when fitting the field
    pub close_dimension: [bool; 3],
    /// Wiener filter noise term Z² (default 0.01)
    pub wiener_filter_noise: f64,
    /// FWHM of the Gaussian blurring the log-intensity histogram (default 0.15)
    pub bias_field_fwhm: f64,
    /// Relative change in field CV that stops iteration (default 0.001)
    pub convergence_threshold: f64,
    /// Number of log-intensity histogram bins (default 200)
    pub histogram_bins: usize,
    /// Working-resolution subsampling per axis (default 1)
    pub shrink_factor: [usize; 3],
    /// Mask label marking the foreground (default 1)
    pub mask_label: u8,
}

impl Default for N3Params {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            fitting_levels: [4, 4, 4],
            spline_order: 3,
            control_points: None,
            close_dimension: [false; 3],
            wiener_filter_noise: 0.01,
            bias_field_fwhm: 0.15,
            convergence_threshold: 0.001,
            histogram_bins: 200,
            shrink_factor: [1, 1, 1],
            mask_label: 1,
        }
    }
}

impl N3Params {
    /// Same fitting depth on every axis
    pub fn with_fitting_levels(mut self, levels: usize) -> Self {
        self.fitting_levels = [levels; 3];
        self
    }

    /// Same shrink factor on every axis
    pub fn with_shrink_factor(mut self, factor: usize) -> Self {
        self.shrink_factor = [factor; 3];
        self
    }

    /// Control points per axis, resolving the default
    pub fn initial_control_points(&self) -> [usize; 3] {
        self.control_points.unwrap_or([self.spline_order + 1; 3])
    }

    /// Spans per axis of the first-level lattice
    pub fn initial_spans(&self) -> [usize; 3] {
        let cp = self.initial_control_points();
        let mut spans = [1usize; 3];
        for d in 0..3 {
            spans[d] = if self.close_dimension[d] {
                cp[d]
            } else {
                cp[d].saturating_sub(self.spline_order).max(1)
            };
        }
        spans
    }

    /// Reject parameter sets the algorithm cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.histogram_bins < 2 {
            return Err(N3Error::Configuration(format!(
                "histogram_bins must be at least 2, got {}",
                self.histogram_bins
            )));
        }
        if self.spline_order == 0 {
            return Err(N3Error::Configuration("spline_order must be positive".into()));
        }
        if self.fitting_levels.iter().any(|&l| l == 0) {
            return Err(N3Error::Configuration(format!(
                "fitting_levels must be positive on every axis, got {:?}",
                self.fitting_levels
            )));
        }
        if self.shrink_factor.iter().any(|&f| f == 0) {
            return Err(N3Error::Configuration(format!(
                "shrink_factor must be positive on every axis, got {:?}",
                self.shrink_factor
            )));
        }
        let cp = self.initial_control_points();
        for d in 0..3 {
            let min = if self.close_dimension[d] { 1 } else { self.spline_order + 1 };
            if cp[d] < min {
                return Err(N3Error::Configuration(format!(
                    "axis {} needs at least {} control points for order {}, got {}",
                    d, min, self.spline_order, cp[d]
                )));
            }
        }
        if !(self.wiener_filter_noise.is_finite() && self.wiener_filter_noise > 0.0) {
            return Err(N3Error::Configuration(format!(
                "wiener_filter_noise must be positive, got {}",
                self.wiener_filter_noise
            )));
        }
        if !(self.bias_field_fwhm.is_finite() && self.bias_field_fwhm > 0.0) {
            return Err(N3Error::Configuration(format!(
                "bias_field_fwhm must be positive, got {}",
                self.bias_field_fwhm
            )));
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(N3Error::Configuration(format!(
                "convergence_threshold must be non-negative, got {}",
                self.convergence_threshold
            )));
        }
        Ok(())
    }
}
