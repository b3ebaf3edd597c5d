//! FFT wrapper for 1D transforms using rustfft
//!
//! Histogram deconvolution works on short zero-padded signals; the workspace
//! caches the forward and inverse plans and the scratch buffer so the
//! several transforms of one sharpening pass share them.

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

/// FFT workspace that caches plans and scratch buffers for reuse
pub struct FftWorkspace {
    n: usize,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl FftWorkspace {
    /// Create a new FFT workspace for signals of length `n`
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft(n, FftDirection::Forward);
        let ifft = planner.plan_fft(n, FftDirection::Inverse);
        let scratch = vec![
            Complex64::new(0.0, 0.0);
            fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len())
        ];
        Self { n, fft, ifft, scratch }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// In-place forward FFT
    pub fn fft(&mut self, data: &mut [Complex64]) {
        self.fft.process_with_scratch(data, &mut self.scratch);
    }

    /// In-place inverse FFT (with normalization)
    pub fn ifft(&mut self, data: &mut [Complex64]) {
        self.ifft.process_with_scratch(data, &mut self.scratch);
        let n = self.n as f64;
        for val in data.iter_mut() {
            *val /= n;
        }
    }

    /// Forward transform of a real signal
    pub fn fft_real(&mut self, data: &[f64]) -> Vec<Complex64> {
        let mut buf: Vec<Complex64> = data.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        self.fft(&mut buf);
        buf
    }

    /// Circular convolution of a real signal with a kernel given by its
    /// spectrum: out = real(ifft(fft(x) * K))
    pub fn convolve_real(&mut self, x: &[f64], kernel_fft: &[Complex64]) -> Vec<f64> {
        let mut buf = self.fft_real(x);
        for (c, &k) in buf.iter_mut().zip(kernel_fft.iter()) {
            *c *= k;
        }
        self.ifft(&mut buf);
        buf.iter().map(|c| c.re).collect()
    }
}
