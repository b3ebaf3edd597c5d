//! Histogram sharpening by Wiener deconvolution
//!
//! The observed log-intensity histogram V is modelled as the true intensity
//! distribution U blurred by a Gaussian F. U is estimated with a Wiener
//! filter in the frequency domain, and every observed bin is mapped to the
//! expected true intensity given that observation:
//!
//! E[v] = ((v * U) ⊛ F)[v] / (U ⊛ F)[v]
//!
//! Reference:
//! Sled, J.G., Zijdenbos, A.P., Evans, A.C. (1998).
//! "A nonparametric method for automatic correction of intensity
//! nonuniformity in MRI data." IEEE Transactions on Medical Imaging, 17(1):87-97.

use log::debug;
use num_complex::Complex64;
use std::f64::consts::{LN_2, PI};

use crate::error::{N3Error, Result};
use crate::fft::FftWorkspace;
use crate::histogram::LogHistogram;

/// Per-bin expected corrected log intensity
#[derive(Clone, Debug)]
pub struct IntensityMapping {
    min: f64,
    slope: f64,
    expected: Vec<f64>,
}

impl IntensityMapping {
    /// Corrected log intensity of an observed log intensity, interpolated
    /// linearly between bins
    #[inline]
    pub fn corrected(&self, v: f64) -> f64 {
        let n = self.expected.len();
        let c = (v - self.min) / self.slope;
        if c <= 0.0 {
            return self.expected[0];
        }
        let idx = c.floor() as usize;
        if idx < n - 1 {
            let e0 = self.expected[idx];
            e0 + (self.expected[idx + 1] - e0) * (c - idx as f64)
        } else {
            self.expected[n - 1]
        }
    }

    pub fn expected(&self) -> &[f64] {
        &self.expected
    }
}

/// Padded transform length: next power of two above the bin count, doubled
pub fn padded_length(bins: usize) -> usize {
    2 * bins.next_power_of_two()
}

/// Wiener deconvolution sharpener
#[derive(Clone, Debug)]
pub struct Sharpener {
    /// FWHM of the blurring Gaussian in log-intensity units
    pub fwhm: f64,
    /// Wiener noise term Z²
    pub noise: f64,
}

impl Sharpener {
    pub fn new(fwhm: f64, noise: f64) -> Self {
        Self { fwhm, noise }
    }

    /// Sharpen `hist` and return the observed-to-corrected bin mapping
    pub fn sharpen(&self, hist: &LogHistogram) -> Result<IntensityMapping> {
        let bins = hist.bins();
        let padded = padded_length(bins);
        let offset = (padded - bins) / 2;
        let mut ws = FftWorkspace::new(padded);

        // Centred, zero-padded histogram
        let mut v = vec![0.0; padded];
        v[offset..offset + bins].copy_from_slice(&hist.counts);
        let v_fft = ws.fft_real(&v);

        // Gaussian kernel sampled in bins, wrapped around index 0
        let width = self.fwhm / hist.slope;
        let exp_factor = 4.0 * LN_2 / (width * width);
        let scale = 2.0 * (LN_2 / PI).sqrt() / width;
        let mut f = vec![0.0; padded];
        f[0] = scale;
        for n in 1..=padded / 2 {
            let g = scale * (-((n * n) as f64) * exp_factor).exp();
            f[n] = g;
            f[padded - n] = g;
        }
        let f_fft = ws.fft_real(&f);

        // Wiener filter: conj(F) / (|F|^2 + Z^2)
        let mut u_fft: Vec<Complex64> = v_fft
            .iter()
            .zip(f_fft.iter())
            .map(|(&vf, &ff)| vf * ff.conj() / (ff.norm_sqr() + self.noise))
            .collect();
        ws.ifft(&mut u_fft);
        let mut u: Vec<f64> = u_fft.iter().map(|c| c.re).collect();
        check_finite(&u, "deconvolved histogram")?;
        u.iter_mut().for_each(|x| *x = x.max(0.0));

        let weighted: Vec<f64> = u
            .iter()
            .enumerate()
            .map(|(n, &un)| (hist.min + (n as f64 - offset as f64) * hist.slope) * un)
            .collect();
        let numerator = ws.convolve_real(&weighted, &f_fft);
        let denominator = ws.convolve_real(&u, &f_fft);
        check_finite(&numerator, "expectation numerator")?;
        check_finite(&denominator, "expectation denominator")?;

        // Bins the blurred estimate does not reach keep their own value
        let floor = denominator.iter().fold(0.0f64, |a, &b| a.max(b)) * 1e-10;
        let mut fallback = 0usize;
        let expected: Vec<f64> = (0..bins)
            .map(|n| {
                let m = n + offset;
                if denominator[m] > floor {
                    numerator[m] / denominator[m]
                } else {
                    fallback += 1;
                    hist.bin_center(n)
                }
            })
            .collect();
        check_finite(&expected, "corrected intensity mapping")?;

        debug!(
            "sharpened {} bins (padded {}, kernel width {:.2} bins, {} identity bins)",
            bins, padded, width, fallback
        );

        Ok(IntensityMapping { min: hist.min, slope: hist.slope, expected })
    }
}

fn check_finite(values: &[f64], what: &str) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(N3Error::NumericalInstability(format!(
            "{} is non-finite at bin {}",
            what, i
        ))),
        None => Ok(()),
    }
}
