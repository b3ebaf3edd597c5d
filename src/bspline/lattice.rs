//! Control point lattice of a tensor-product B-spline scalar field
//!
//! The lattice parametrizes a field over the voxel grid of the full
//! resolution image (`domain`). Continuous voxel index q along an open axis
//! of length n maps to the parametric coordinate u = q / (n - 1) * spans, so
//! the first and last voxel centres sit on the ends of the parametric range.
//! A closed (periodic) axis maps u = q / n * spans and wraps control indices.

use crate::error::{N3Error, Result};
use crate::image::idx3d;

use super::basis::{basis_derivative_weights, basis_weights, refinement_mask};

/// Scalar control values of a uniform B-spline field
#[derive(Clone, Debug, PartialEq)]
pub struct ControlPointLattice {
    size: [usize; 3],
    order: usize,
    closed: [bool; 3],
    domain: [usize; 3],
    values: Vec<f64>,
}

/// Per-axis basis support of one evaluation point
pub(crate) struct Support {
    pub weights: [Vec<f64>; 3],
    pub indices: [Vec<usize>; 3],
}

impl Support {
    pub fn new(order: usize) -> Self {
        Self {
            weights: [vec![0.0; order + 1], vec![0.0; order + 1], vec![0.0; order + 1]],
            indices: [vec![0; order + 1], vec![0; order + 1], vec![0; order + 1]],
        }
    }
}

impl ControlPointLattice {
    /// Zero field with `spans` polynomial pieces per axis
    pub fn zeros(spans: [usize; 3], order: usize, closed: [bool; 3], domain: [usize; 3]) -> Self {
        let mut size = [0usize; 3];
        for d in 0..3 {
            size[d] = if closed[d] { spans[d].max(1) } else { spans[d].max(1) + order };
        }
        Self {
            size,
            order,
            closed,
            domain,
            values: vec![0.0; size[0] * size[1] * size[2]],
        }
    }

    /// Control points per axis
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn closed(&self) -> [bool; 3] {
        self.closed
    }

    /// Full-resolution image dimensions the field is defined over
    pub fn domain(&self) -> [usize; 3] {
        self.domain
    }

    /// Polynomial pieces per axis
    pub fn spans(&self) -> [usize; 3] {
        let mut spans = self.size;
        for d in 0..3 {
            if !self.closed[d] {
                spans[d] -= self.order;
            }
        }
        spans
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[idx3d(i, j, k, self.size[0], self.size[1])]
    }

    #[inline]
    pub(crate) fn flat_index(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.size[0], self.size[1])
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// True when both lattices describe fields on the same grid
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.size == other.size
            && self.order == other.order
            && self.closed == other.closed
            && self.domain == other.domain
    }

    /// Accumulate another field defined on the same lattice
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        if !self.is_compatible(other) {
            return Err(N3Error::Domain(format!(
                "cannot add lattice {:?} (order {}) to lattice {:?} (order {})",
                other.size, other.order, self.size, self.order
            )));
        }
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a += b;
        }
        Ok(())
    }

    /// Parametric coordinate of continuous voxel index `q` along `axis`
    pub fn parametric(&self, axis: usize, q: f64) -> f64 {
        let n = self.domain[axis];
        let spans = self.spans()[axis] as f64;
        if self.closed[axis] {
            (q / n as f64 * spans).rem_euclid(spans)
        } else if n <= 1 {
            0.0
        } else {
            (q / (n - 1) as f64 * spans).clamp(0.0, spans)
        }
    }

    /// Parametric coordinates of continuous voxel index `q`
    pub fn to_parametric(&self, q: [f64; 3]) -> [f64; 3] {
        [self.parametric(0, q[0]), self.parametric(1, q[1]), self.parametric(2, q[2])]
    }

    /// Span index and local coordinate of parametric `u`
    #[inline]
    fn locate(&self, axis: usize, u: f64) -> (usize, f64) {
        let spans = self.spans()[axis];
        let s = (u.floor().max(0.0) as usize).min(spans - 1);
        (s, u - s as f64)
    }

    /// Basis weights and control indices touching parametric point `u`
    pub(crate) fn support(&self, u: [f64; 3], support: &mut Support) {
        for d in 0..3 {
            self.axis_support(d, u[d], &mut support.weights[d], &mut support.indices[d]);
        }
    }

    /// Basis weights and control indices along one axis
    pub(crate) fn axis_support(&self, axis: usize, u: f64, weights: &mut [f64], indices: &mut [usize]) {
        let (s, t) = self.locate(axis, u);
        basis_weights(t, self.order, weights);
        self.fill_indices(axis, s, indices);
    }

    /// Like [`Self::support`] but with the derivative basis along `deriv_axis`
    pub(crate) fn derivative_support(&self, u: [f64; 3], deriv_axis: usize, support: &mut Support) {
        for d in 0..3 {
            let (s, t) = self.locate(d, u[d]);
            if d == deriv_axis {
                basis_derivative_weights(t, self.order, &mut support.weights[d]);
            } else {
                basis_weights(t, self.order, &mut support.weights[d]);
            }
            self.fill_indices(d, s, &mut support.indices[d]);
        }
    }

    fn fill_indices(&self, axis: usize, span: usize, out: &mut [usize]) {
        let n = self.size[axis];
        for (k, idx) in out.iter_mut().enumerate().take(self.order + 1) {
            *idx = if self.closed[axis] { (span + k) % n } else { span + k };
        }
    }

    /// Exact representation of the same field with doubled knot density on
    /// each axis where `axes[d]` is set
    pub fn refine(&self, axes: [bool; 3]) -> Self {
        let mut out = self.clone();
        for d in 0..3 {
            if axes[d] {
                out = out.refine_axis(d);
            }
        }
        out
    }

    fn refine_axis(&self, axis: usize) -> Self {
        let mask = refinement_mask(self.order);
        let p = self.order as isize;
        let old_spans = self.spans()[axis];
        let new_n = if self.closed[axis] { 2 * old_spans } else { 2 * old_spans + self.order };

        let mut size = self.size;
        size[axis] = new_n;
        let mut values = vec![0.0; size[0] * size[1] * size[2]];

        let [sx, sy, sz] = self.size;
        for k in 0..sz {
            for j in 0..sy {
                for i in 0..sx {
                    let c = self.values[idx3d(i, j, k, sx, sy)];
                    if c == 0.0 {
                        continue;
                    }
                    let src = [i, j, k][axis] as isize;
                    for (m, &w) in mask.iter().enumerate() {
                        let mut dst = 2 * src - p + m as isize;
                        if self.closed[axis] {
                            dst = dst.rem_euclid(new_n as isize);
                        } else if dst < 0 || dst >= new_n as isize {
                            // basis lies entirely outside the domain
                            continue;
                        }
                        let mut at = [i, j, k];
                        at[axis] = dst as usize;
                        values[idx3d(at[0], at[1], at[2], size[0], size[1])] += w * c;
                    }
                }
            }
        }

        Self {
            size,
            order: self.order,
            closed: self.closed,
            domain: self.domain,
            values,
        }
    }
}
