//! Uniform B-spline basis functions
//!
//! On a span with local coordinate t in [0, 1], a spline of order p touches
//! p + 1 control points. The weights are evaluated with the Cox-de Boor
//! recurrence specialised to unit knot spacing:
//!
//! N_d(x) = (x N_{d-1}(x) + (d + 1 - x) N_{d-1}(x - 1)) / d
//!
//! where weight k of the span equals N_p(t + p - k).

/// Fill `out[0..=order]` with the basis weights at local coordinate `t`
///
/// `out` must hold at least `order + 1` values.
pub fn basis_weights(t: f64, order: usize, out: &mut [f64]) {
    let out = &mut out[..=order];
    out.fill(0.0);
    out[0] = 1.0;

    for d in 1..=order {
        let inv_d = 1.0 / d as f64;
        // Downward so out[k - 1] still holds the degree d - 1 value
        for k in (0..=d).rev() {
            let left = if k >= 1 { (t + (d - k) as f64) * out[k - 1] } else { 0.0 };
            let right = if k < d { ((k + 1) as f64 - t) * out[k] } else { 0.0 };
            out[k] = (left + right) * inv_d;
        }
    }
}

/// Fill `out[0..=order]` with d/dt of the basis weights at `t`
///
/// Uses N_p'(x) = N_{p-1}(x) - N_{p-1}(x - 1).
pub fn basis_derivative_weights(t: f64, order: usize, out: &mut [f64]) {
    if order == 0 {
        out[0] = 0.0;
        return;
    }
    basis_weights(t, order - 1, out);
    out[order] = 0.0;
    for k in (0..=order).rev() {
        let a = if k >= 1 { out[k - 1] } else { 0.0 };
        let b = if k < order { out[k] } else { 0.0 };
        out[k] = a - b;
    }
}

/// Subdivision mask for doubling the knot density: C(p+1, k) / 2^p
pub fn refinement_mask(order: usize) -> Vec<f64> {
    let scale = 0.5f64.powi(order as i32);
    let mut binom = vec![1.0f64; order + 2];
    for k in 1..=order + 1 {
        binom[k] = binom[k - 1] * (order + 2 - k) as f64 / k as f64;
    }
    binom.iter().map(|&c| c * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cubic_weights_at_knot() {
        let mut w = [0.0; 4];
        basis_weights(0.0, 3, &mut w);
        let expected = [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0, 0.0];
        for k in 0..4 {
            assert!((w[k] - expected[k]).abs() < 1e-12, "k={}: {} vs {}", k, w[k], expected[k]);
        }
    }

    #[test]
    fn test_linear_weights() {
        let mut w = [0.0; 2];
        basis_weights(0.25, 1, &mut w);
        assert!((w[0] - 0.75).abs() < 1e-12);
        assert!((w[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_partition_of_unity() {
        let mut w = [0.0; 6];
        for order in 0..=5 {
            for step in 0..=10 {
                let t = step as f64 / 10.0;
                basis_weights(t, order, &mut w);
                let sum: f64 = w[..=order].iter().sum();
                assert!((sum - 1.0).abs() < 1e-12, "order {} t {}: sum {}", order, t, sum);
                assert!(w[..=order].iter().all(|&v| v >= -1e-15));
            }
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let h = 1e-6;
        let mut d = [0.0; 4];
        let mut lo = [0.0; 4];
        let mut hi = [0.0; 4];
        for &t in &[0.1, 0.5, 0.9] {
            basis_derivative_weights(t, 3, &mut d);
            basis_weights(t - h, 3, &mut lo);
            basis_weights(t + h, 3, &mut hi);
            for k in 0..4 {
                let fd = (hi[k] - lo[k]) / (2.0 * h);
                assert!((d[k] - fd).abs() < 1e-6, "t {} k {}: {} vs {}", t, k, d[k], fd);
            }
            // derivative of a partition of unity sums to zero
            assert!(d.iter().sum::<f64>().abs() < 1e-12);
        }
    }

    #[test]
    fn test_refinement_mask() {
        assert_eq!(refinement_mask(1), vec![0.5, 1.0, 0.5]);
        let cubic = refinement_mask(3);
        let expected = [0.125, 0.5, 0.75, 0.5, 0.125];
        for (a, b) in cubic.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-15);
        }
    }
}
