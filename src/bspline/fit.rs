//! Multi-level B-spline approximation of scattered samples
//!
//! Each level solves the local least-squares problem of the MBA scheme: a
//! sample with value v and tensor weights w_c proposes phi_c = w_c v / sum(w^2)
//! for each control point it touches, and every control point takes the
//! w_c^2-weighted mean of the proposals it receives. Later levels fit the
//! residual of the levels before them on a lattice with twice as many spans,
//! and the cumulative lattice is refined exactly before the increment is added.

use log::debug;
use rayon::prelude::*;

use crate::error::{N3Error, Result};
use crate::params::N3Params;

use super::lattice::{ControlPointLattice, Support};
use super::ScatteredSample;

/// Scattered-data B-spline fitter
#[derive(Clone, Debug)]
pub struct BSplineFitter {
    order: usize,
    spans: [usize; 3],
    levels: [usize; 3],
    closed: [bool; 3],
    domain: [usize; 3],
}

impl BSplineFitter {
    /// # Arguments
    /// * `order` - Spline order
    /// * `spans` - Polynomial pieces per axis at the first level
    /// * `levels` - Fitting levels per axis; an axis stops refining after its count
    /// * `closed` - Periodic axes
    /// * `domain` - Full resolution image dimensions the field is defined over
    pub fn new(
        order: usize,
        spans: [usize; 3],
        levels: [usize; 3],
        closed: [bool; 3],
        domain: [usize; 3],
    ) -> Self {
        Self { order, spans, levels, closed, domain }
    }

    pub fn from_params(params: &N3Params, domain: [usize; 3]) -> Self {
        Self::new(
            params.spline_order,
            params.initial_spans(),
            params.fitting_levels,
            params.close_dimension,
            domain,
        )
    }

    /// Total number of levels (the deepest axis)
    pub fn number_of_levels(&self) -> usize {
        self.levels.iter().copied().max().unwrap_or(1).max(1)
    }

    /// Empty lattice with the resolution of the final level
    pub fn final_lattice(&self) -> ControlPointLattice {
        let mut lattice = ControlPointLattice::zeros(self.spans, self.order, self.closed, self.domain);
        for level in 1..self.number_of_levels() {
            lattice = lattice.refine(self.refined_axes(level));
        }
        lattice
    }

    /// Axes whose knot density doubles when entering `level`
    fn refined_axes(&self, level: usize) -> [bool; 3] {
        [
            level < self.levels[0],
            level < self.levels[1],
            level < self.levels[2],
        ]
    }

    /// Fit a field to `samples`, returning the lattice of the final level
    pub fn fit(&self, samples: &[ScatteredSample]) -> Result<ControlPointLattice> {
        if samples.is_empty() {
            return Err(N3Error::Domain("no samples to fit".into()));
        }

        let positions: Vec<[f64; 3]> = samples.iter().map(|s| s.position).collect();
        let mut residual: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let n_levels = self.number_of_levels();

        let mut spans = self.spans;
        let mut total: Option<ControlPointLattice> = None;

        for level in 0..n_levels {
            let refine = self.refined_axes(level);
            if level > 0 {
                for d in 0..3 {
                    if refine[d] {
                        spans[d] *= 2;
                    }
                }
            }

            let increment = self.fit_level(spans, &positions, &residual)?;
            debug!("fit level {} with spans {:?}", level + 1, spans);

            if level + 1 < n_levels {
                let fitted = increment.evaluate_positions(&positions);
                for (r, f) in residual.iter_mut().zip(fitted.iter()) {
                    *r -= f;
                }
            }

            total = Some(match total {
                None => increment,
                Some(prev) => {
                    let mut refined = prev.refine(refine);
                    refined.add_assign(&increment)?;
                    refined
                }
            });
        }

        // n_levels >= 1 so the loop assigned at least once
        total.ok_or_else(|| N3Error::Configuration("no fitting levels".into()))
    }

    /// Single-level least-squares control point estimate
    fn fit_level(
        &self,
        spans: [usize; 3],
        positions: &[[f64; 3]],
        values: &[f64],
    ) -> Result<ControlPointLattice> {
        let mut lattice = ControlPointLattice::zeros(spans, self.order, self.closed, self.domain);
        let n = lattice.values().len();
        let order = self.order;
        let grid = &lattice;

        let (delta, omega) = positions
            .par_iter()
            .zip(values.par_iter())
            .fold(
                || (vec![0.0; n], vec![0.0; n], Support::new(order)),
                |(mut delta, mut omega, mut support), (&q, &v)| {
                    grid.support(grid.to_parametric(q), &mut support);
                    let w2sum: f64 = support
                        .weights
                        .iter()
                        .map(|w| w.iter().map(|x| x * x).sum::<f64>())
                        .product();
                    if w2sum > 0.0 {
                        for (c, &kz) in support.indices[2].iter().enumerate() {
                            for (b, &jy) in support.indices[1].iter().enumerate() {
                                let wzy = support.weights[2][c] * support.weights[1][b];
                                for (a, &ix) in support.indices[0].iter().enumerate() {
                                    let w = wzy * support.weights[0][a];
                                    let w2 = w * w;
                                    let phi = w * v / w2sum;
                                    let idx = grid.flat_index(ix, jy, kz);
                                    delta[idx] += w2 * phi;
                                    omega[idx] += w2;
                                }
                            }
                        }
                    }
                    (delta, omega, support)
                },
            )
            .map(|(delta, omega, _)| (delta, omega))
            .reduce(
                || (vec![0.0; n], vec![0.0; n]),
                |(mut d1, mut o1), (d2, o2)| {
                    for (a, b) in d1.iter_mut().zip(d2.iter()) {
                        *a += b;
                    }
                    for (a, b) in o1.iter_mut().zip(o2.iter()) {
                        *a += b;
                    }
                    (d1, o1)
                },
            );

        for ((c, &d), &o) in lattice.values_mut().iter_mut().zip(delta.iter()).zip(omega.iter()) {
            *c = if o > 0.0 { d / o } else { 0.0 };
        }

        if !lattice.is_finite() {
            return Err(N3Error::NumericalInstability(format!(
                "non-finite control points fitting {} samples on spans {:?}",
                positions.len(),
                spans
            )));
        }
        Ok(lattice)
    }
}
