//! Common test utilities for N3-core integration tests

#![allow(dead_code)]

use n3_core::image::{idx3d, sphere_mask};
use n3_core::{ImageGeometry, MaskImage, ScalarImage};

/// Values of `data` on voxels carrying `label`
fn labelled<'a>(data: &'a [f64], labels: &'a [u8], label: u8) -> impl Iterator<Item = f64> + 'a {
    data.iter()
        .zip(labels.iter())
        .filter(move |(_, &l)| l == label)
        .map(|(&v, _)| v)
}

/// RMSE between two volumes over voxels carrying `label`
pub fn rmse(a: &[f64], b: &[f64], labels: &[u8], label: u8) -> f64 {
    let diff: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    let (sum_sq, count) = labelled(&diff, labels, label).fold((0.0, 0usize), |(s, c), d| (s + d * d, c + 1));
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Pearson correlation of two volumes over voxels carrying `label`
pub fn correlation(a: &[f64], b: &[f64], labels: &[u8], label: u8) -> f64 {
    let xs: Vec<f64> = labelled(a, labels, label).collect();
    let ys: Vec<f64> = labelled(b, labels, label).collect();
    if xs.is_empty() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys.iter()) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    sxy / denom
}

/// Coefficient of variation over voxels carrying `label`
pub fn masked_cv(data: &[f64], labels: &[u8], label: u8) -> f64 {
    let values: Vec<f64> = labelled(data, labels, label).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt() / mean
}

/// Largest deviation from the mean over voxels carrying `label`
pub fn masked_spread(data: &[f64], labels: &[u8], label: u8) -> f64 {
    let values: Vec<f64> = labelled(data, labels, label).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).abs()).fold(0.0, f64::max)
}

/// Sphere phantom with a multiplicative field varying along x
pub struct Phantom {
    /// Biased intensities
    pub image: ScalarImage,
    /// Sphere mask (label 1)
    pub mask: MaskImage,
    /// True log bias field on every voxel
    pub log_field: Vec<f64>,
}

impl Phantom {
    /// `intensity * exp(amplitude * sin(x / period))` inside a sphere of
    /// `radius` voxels centred in an `n`^3 volume, 0 outside
    pub fn sphere(n: usize, radius: f64, intensity: f64, amplitude: f64, period: f64) -> Self {
        let geom = ImageGeometry::new([n, n, n], [1.0; 3]);
        let c = n as f64 / 2.0;
        let mask = sphere_mask(&geom, [c, c, c], radius, 1);

        let mut data = vec![0.0; geom.n_total()];
        let mut log_field = vec![0.0; geom.n_total()];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let idx = idx3d(i, j, k, n, n);
                    let f = amplitude * (i as f64 / period).sin();
                    log_field[idx] = f;
                    if mask.labels[idx] == 1 {
                        data[idx] = intensity * f.exp();
                    }
                }
            }
        }

        Phantom {
            image: ScalarImage::new(geom, data).unwrap(),
            mask,
            log_field,
        }
    }
}

/// Result of a correction run against the uniform ground truth
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub cv_before: f64,
    pub cv_after: f64,
    pub iterations: usize,
}

impl TestResult {
    pub fn print(&self) {
        println!(
            "{:<15} CV {:.5} -> {:.5}  iterations={}",
            self.name, self.cv_before, self.cv_after, self.iterations
        );
    }
}
