//! Error taxonomy for bias field estimation
//!
//! Configuration and domain errors reject a run before any estimate exists.
//! Numerical instability raised inside an iteration is wrapped by the driver
//! into [`N3Error::Aborted`], which carries the best lattice computed so far.

use thiserror::Error;

use crate::bspline::ControlPointLattice;

#[derive(Debug, Error)]
pub enum N3Error {
    /// Invalid parameter (bin count, fitting levels, spline order, ...)
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Empty or degenerate foreground, or mismatched image geometry
    #[error("degenerate domain: {0}")]
    Domain(String),

    /// Non-finite values produced by deconvolution or spline fitting
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// A stage failed mid-run; `partial` is the accumulated log bias field
    /// lattice from the iterations that completed before the failure.
    #[error("bias field estimation aborted at iteration {iteration}: {cause}")]
    Aborted {
        iteration: usize,
        #[source]
        cause: Box<N3Error>,
        partial: Box<ControlPointLattice>,
    },
}

impl N3Error {
    /// Partial log bias field lattice, if the run got far enough to have one
    pub fn partial_lattice(&self) -> Option<&ControlPointLattice> {
        match self {
            N3Error::Aborted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, N3Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = N3Error::Configuration("histogram_bins must be at least 2".into());
        assert_eq!(e.to_string(), "invalid configuration: histogram_bins must be at least 2");
        assert!(e.partial_lattice().is_none());
    }

    #[test]
    fn test_aborted_exposes_partial() {
        let lattice = ControlPointLattice::zeros([1, 1, 1], 3, [false; 3], [8, 8, 8]);
        let e = N3Error::Aborted {
            iteration: 3,
            cause: Box::new(N3Error::NumericalInstability("NaN in histogram transform".into())),
            partial: Box::new(lattice),
        };
        assert!(e.to_string().contains("iteration 3"));
        assert_eq!(e.partial_lattice().map(|l| l.size()), Some([4, 4, 4]));
        assert!(std::error::Error::source(&e).is_some());
    }
}
