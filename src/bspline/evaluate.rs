//! Evaluation of a control point lattice into field values
//!
//! Point queries go through [`Support`]; grid evaluation precomputes the
//! per-axis basis tables once and sums the tensor product per voxel,
//! parallel over z slices.

use rayon::prelude::*;

use crate::image::{idx3d, shrunk_source_index, ImageGeometry, ScalarImage};

use super::lattice::{ControlPointLattice, Support};

/// Precomputed basis weights and control indices along one axis
struct AxisTable {
    weights: Vec<f64>,
    indices: Vec<usize>,
    width: usize,
}

impl AxisTable {
    fn new(lattice: &ControlPointLattice, axis: usize, positions: impl Iterator<Item = f64>) -> Self {
        let width = lattice.order() + 1;
        let mut weights = Vec::new();
        let mut indices = Vec::new();
        let mut w = vec![0.0; width];
        let mut ix = vec![0usize; width];
        for q in positions {
            lattice.axis_support(axis, lattice.parametric(axis, q), &mut w, &mut ix);
            weights.extend_from_slice(&w);
            indices.extend_from_slice(&ix);
        }
        Self { weights, indices, width }
    }

    #[inline]
    fn row(&self, n: usize) -> (&[f64], &[usize]) {
        let r = n * self.width..(n + 1) * self.width;
        (&self.weights[r.clone()], &self.indices[r])
    }
}

impl ControlPointLattice {
    /// Field value at parametric coordinate `u`
    pub fn evaluate_at_parametric(&self, u: [f64; 3]) -> f64 {
        let mut support = Support::new(self.order());
        self.support(u, &mut support);
        self.contract(&support)
    }

    /// Field value at continuous voxel index `q` of the domain image
    pub fn evaluate_at_index(&self, q: [f64; 3]) -> f64 {
        self.evaluate_at_parametric(self.to_parametric(q))
    }

    /// Field value at a physical position of an image with geometry `geometry`
    pub fn evaluate_at_point(&self, geometry: &ImageGeometry, point: [f64; 3]) -> f64 {
        self.evaluate_at_index(geometry.physical_to_index(point))
    }

    /// Field values at many continuous voxel indices
    pub fn evaluate_positions(&self, positions: &[[f64; 3]]) -> Vec<f64> {
        positions
            .par_iter()
            .map_init(
                || Support::new(self.order()),
                |support, &q| {
                    self.support(self.to_parametric(q), support);
                    self.contract(support)
                },
            )
            .collect()
    }

    /// Gradient of the field with respect to the voxel index at `q`
    pub fn gradient_at_index(&self, q: [f64; 3]) -> [f64; 3] {
        let u = self.to_parametric(q);
        let spans = self.spans();
        let domain = self.domain();
        let mut support = Support::new(self.order());
        let mut grad = [0.0; 3];
        for d in 0..3 {
            let du_dq = if self.closed()[d] {
                spans[d] as f64 / domain[d] as f64
            } else if domain[d] > 1 {
                spans[d] as f64 / (domain[d] - 1) as f64
            } else {
                0.0
            };
            if du_dq == 0.0 {
                continue;
            }
            self.derivative_support(u, d, &mut support);
            grad[d] = self.contract(&support) * du_dq;
        }
        grad
    }

    /// Field over a grid of `dims` voxels where output voxel i along axis d
    /// samples domain index `shrunk_source_index(i, factors[d], domain[d])`
    ///
    /// With `factors = [1, 1, 1]` and `dims = domain` this is the full
    /// resolution field.
    pub fn evaluate_grid(&self, dims: [usize; 3], factors: [usize; 3]) -> Vec<f64> {
        let domain = self.domain();
        let tables: Vec<AxisTable> = (0..3)
            .map(|d| {
                let positions = (0..dims[d]).map(|i| shrunk_source_index(i, factors[d], domain[d]) as f64);
                AxisTable::new(self, d, positions)
            })
            .collect();

        let [nx, ny, nz] = dims;
        let mut out = vec![0.0; nx * ny * nz];
        out.par_chunks_mut(nx * ny)
            .enumerate()
            .for_each(|(k, slice)| {
                let (wz, iz) = tables[2].row(k);
                for j in 0..ny {
                    let (wy, iy) = tables[1].row(j);
                    for i in 0..nx {
                        let (wx, ix) = tables[0].row(i);
                        let mut sum = 0.0;
                        for (c, &kz) in iz.iter().enumerate() {
                            for (b, &jy) in iy.iter().enumerate() {
                                let wzy = wz[c] * wy[b];
                                for (a, &ixx) in ix.iter().enumerate() {
                                    sum += wzy * wx[a] * self.get(ixx, jy, kz);
                                }
                            }
                        }
                        slice[idx3d(i, j, 0, nx, ny)] = sum;
                    }
                }
            });
        out
    }

    /// Field sampled on every voxel of `geometry`, which must match the
    /// lattice domain
    pub fn evaluate_image(&self, geometry: &ImageGeometry) -> ScalarImage {
        let data = self.evaluate_grid(geometry.dims, [1, 1, 1]);
        ScalarImage { geometry: geometry.clone(), data }
    }

    fn contract(&self, support: &Support) -> f64 {
        let mut sum = 0.0;
        for (c, &kz) in support.indices[2].iter().enumerate() {
            for (b, &jy) in support.indices[1].iter().enumerate() {
                let wzy = support.weights[2][c] * support.weights[1][b];
                for (a, &ix) in support.indices[0].iter().enumerate() {
                    sum += wzy * support.weights[0][a] * self.get(ix, jy, kz);
                }
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_lattice_evaluates_constant() {
        let mut lat = ControlPointLattice::zeros([2, 3, 1], 3, [false; 3], [10, 12, 4]);
        lat.values_mut().fill(0.7);
        for &q in &[[0.0, 0.0, 0.0], [9.0, 11.0, 3.0], [4.4, 6.1, 1.7]] {
            assert!((lat.evaluate_at_index(q) - 0.7).abs() < 1e-12);
        }
        let grid = lat.evaluate_grid([10, 12, 4], [1, 1, 1]);
        assert!(grid.iter().all(|&v| (v - 0.7).abs() < 1e-12));
    }

    #[test]
    fn test_linear_controls_reproduce_linear_field() {
        // Uniform B-splines reproduce linear functions from Greville-spaced controls
        let order = 3;
        let mut lat = ControlPointLattice::zeros([4, 1, 1], order, [false; 3], [17, 1, 1]);
        let [sx, sy, sz] = lat.size();
        for k in 0..sz {
            for j in 0..sy {
                for i in 0..sx {
                    let greville = i as f64 - (order as f64 - 1.0) / 2.0;
                    let idx = lat.flat_index(i, j, k);
                    lat.values_mut()[idx] = greville;
                }
            }
        }
        // f(u) = u, and u = q * spans / (n - 1)
        for i in 0..17 {
            let f = lat.evaluate_at_index([i as f64, 0.0, 0.0]);
            assert!((f - i as f64 * 0.25).abs() < 1e-10, "i={} f={}", i, f);
        }
    }

    #[test]
    fn test_grid_matches_point_evaluation() {
        let mut lat = ControlPointLattice::zeros([2, 2, 2], 3, [false, true, false], [9, 8, 7]);
        for (n, v) in lat.values_mut().iter_mut().enumerate() {
            *v = ((n * 7919) % 13) as f64 / 13.0 - 0.5;
        }
        let grid = lat.evaluate_grid([9, 8, 7], [1, 1, 1]);
        for &(i, j, k) in &[(0, 0, 0), (8, 7, 6), (3, 5, 2)] {
            let p = lat.evaluate_at_index([i as f64, j as f64, k as f64]);
            assert!((grid[idx3d(i, j, k, 9, 8)] - p).abs() < 1e-12);
        }

        let coarse = lat.evaluate_grid([4, 4, 3], [2, 2, 2]);
        let q = [shrunk_source_index(3, 2, 9) as f64, shrunk_source_index(1, 2, 8) as f64, shrunk_source_index(2, 2, 7) as f64];
        assert!((coarse[idx3d(3, 1, 2, 4, 4)] - lat.evaluate_at_index(q)).abs() < 1e-12);

        let positions = vec![[1.5, 2.5, 3.5], [8.0, 0.0, 6.0]];
        let vals = lat.evaluate_positions(&positions);
        for (v, &q) in vals.iter().zip(positions.iter()) {
            assert!((v - lat.evaluate_at_index(q)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_point_evaluation_through_geometry() {
        let mut lat = ControlPointLattice::zeros([1, 1, 1], 3, [false; 3], [5, 5, 5]);
        lat.values_mut()[0] = 1.0;
        let geom = ImageGeometry::new([5, 5, 5], [2.0, 2.0, 2.0]).with_origin([10.0, 0.0, 0.0]);
        let p = geom.index_to_physical([1.0, 2.0, 3.0]);
        let a = lat.evaluate_at_point(&geom, p);
        let b = lat.evaluate_at_index([1.0, 2.0, 3.0]);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut lat = ControlPointLattice::zeros([2, 2, 1], 3, [false; 3], [11, 9, 5]);
        for (n, v) in lat.values_mut().iter_mut().enumerate() {
            *v = (n as f64 * 0.37).cos();
        }
        let q = [4.3, 3.7, 2.2];
        let g = lat.gradient_at_index(q);
        let h = 1e-5;
        for d in 0..3 {
            let mut lo = q;
            let mut hi = q;
            lo[d] -= h;
            hi[d] += h;
            let fd = (lat.evaluate_at_index(hi) - lat.evaluate_at_index(lo)) / (2.0 * h);
            assert!((g[d] - fd).abs() < 1e-6, "axis {}: {} vs {}", d, g[d], fd);
        }
    }
}
