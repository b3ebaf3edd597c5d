//! Log-intensity histogram of the foreground
//!
//! Bins are centred at `min + n * slope` with `slope = (max - min) / (N - 1)`,
//! so the extreme samples land exactly on the first and last bin. Each sample
//! is split linearly between its two neighbouring bins.

use rayon::prelude::*;

use crate::error::{N3Error, Result};

/// Normalized histogram of log intensities
#[derive(Clone, Debug)]
pub struct LogHistogram {
    pub min: f64,
    pub max: f64,
    /// Distance between bin centres
    pub slope: f64,
    /// Bin masses, summing to 1
    pub counts: Vec<f64>,
}

impl LogHistogram {
    /// Build the histogram of `values` (log intensities of foreground voxels)
    ///
    /// # Errors
    /// `Configuration` when `bins < 2`; `Domain` when `values` is empty or
    /// its range is degenerate.
    pub fn build(values: &[f64], bins: usize) -> Result<Self> {
        if bins < 2 {
            return Err(N3Error::Configuration(format!(
                "histogram needs at least 2 bins, got {}",
                bins
            )));
        }
        if values.is_empty() {
            return Err(N3Error::Domain("no foreground voxels".into()));
        }

        let (min, max) = values
            .par_iter()
            .fold(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |(a, b), (c, d)| (a.min(c), b.max(d)),
            );

        if !(min.is_finite() && max.is_finite()) {
            return Err(N3Error::NumericalInstability(format!(
                "non-finite log intensity range [{}, {}]",
                min, max
            )));
        }
        if min >= max {
            return Err(N3Error::Domain(format!(
                "log intensity range collapsed to {}",
                min
            )));
        }

        let slope = (max - min) / (bins - 1) as f64;

        // Per-thread partial histograms summed in the reduction
        let counts = values
            .par_iter()
            .fold(
                || vec![0.0f64; bins],
                |mut h, &v| {
                    let c = (v - min) / slope;
                    let idx = (c.floor().max(0.0) as usize).min(bins - 2);
                    let offset = c - idx as f64;
                    h[idx] += 1.0 - offset;
                    h[idx + 1] += offset;
                    h
                },
            )
            .reduce(
                || vec![0.0f64; bins],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b.iter()) {
                        *x += y;
                    }
                    a
                },
            );

        let total = values.len() as f64;
        let counts = counts.into_iter().map(|c| c / total).collect();

        Ok(Self { min, max, slope, counts })
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Log intensity at the centre of bin `n`
    #[inline]
    pub fn bin_center(&self, n: usize) -> f64 {
        self.min + n as f64 * self.slope
    }

    /// Continuous bin coordinate of a log intensity
    #[inline]
    pub fn fractional_bin(&self, v: f64) -> f64 {
        (v - self.min) / self.slope
    }
}
