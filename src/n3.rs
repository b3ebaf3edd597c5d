//! N3 iteration driver
//!
//! Each iteration sharpens the log-intensity histogram of the current
//! estimate, samples the residual log bias field at every foreground voxel,
//! fits a B-spline to the samples, adds it to the accumulated field and
//! removes the accumulated field from the log input.
//!
//! Reference:
//! Sled, J.G., Zijdenbos, A.P., Evans, A.C. (1998).
//! "A nonparametric method for automatic correction of intensity
//! nonuniformity in MRI data." IEEE Transactions on Medical Imaging, 17(1):87-97.

use log::{debug, info, warn};

use crate::bspline::{BSplineFitter, ControlPointLattice};
use crate::convergence::ConvergenceMonitor;
use crate::correction::correct_image;
use crate::error::{N3Error, Result};
use crate::histogram::LogHistogram;
use crate::image::{shrunk_source_index, threshold_mask, MaskImage, ScalarImage};
use crate::params::N3Params;
use crate::residual::sample_residual_field;
use crate::sharpen::{IntensityMapping, Sharpener};

/// Lower threshold of the automatic mask used when none is supplied
pub const AUTO_MASK_THRESHOLD: f64 = 1.0;

/// Driver states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    IteratingHistogram,
    IteratingFit,
    IteratingApply,
    Converged,
    MaxIterationsReached,
    Failed,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DriverState::Converged | DriverState::MaxIterationsReached | DriverState::Failed
        )
    }
}

/// How a successful run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Converged,
    /// Non-convergence warning: the cap was hit before the threshold was met
    MaxIterationsReached,
}

/// Progress report emitted after every completed iteration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationEvent {
    /// 1-based iteration index
    pub iteration: usize,
    /// Relative change of the field CV (infinite on the first iteration)
    pub convergence_measurement: f64,
    /// CV of the multiplicative field over the foreground
    pub coefficient_of_variation: f64,
}

/// Accumulated log bias field and run summary
#[derive(Clone, Debug)]
pub struct BiasFieldEstimate {
    pub lattice: ControlPointLattice,
    pub iterations: usize,
    pub convergence_measurement: f64,
    pub termination: Termination,
}

/// Result of a full correction
#[derive(Clone, Debug)]
pub struct N3Output {
    /// Accumulated log bias field control points
    pub lattice: ControlPointLattice,
    /// Input divided by the estimated bias field, same geometry as the input
    pub corrected: ScalarImage,
    pub iterations: usize,
    pub convergence_measurement: f64,
    pub termination: Termination,
}

impl N3Output {
    /// True when the iteration cap ended the run
    pub fn non_convergence_warning(&self) -> bool {
        self.termination == Termination::MaxIterationsReached
    }
}

/// Foreground of the working-resolution image
struct WorkingSet {
    /// Log intensity of the input per foreground voxel
    log_input: Vec<f64>,
    /// Continuous full-resolution index per foreground voxel
    positions: Vec<[f64; 3]>,
}

/// Runs the N3 state machine over one image
pub struct IterationDriver {
    params: N3Params,
    state: DriverState,
    monitor: ConvergenceMonitor,
}

impl IterationDriver {
    pub fn new(params: N3Params) -> Self {
        let monitor = ConvergenceMonitor::new(params.convergence_threshold, params.max_iterations);
        Self {
            params,
            state: DriverState::Initializing,
            monitor,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn params(&self) -> &N3Params {
        &self.params
    }

    /// Estimate the log bias field of `image`
    ///
    /// `mask` selects the foreground through `params.mask_label`; without a
    /// mask, voxels at or above [`AUTO_MASK_THRESHOLD`] are used.
    /// `observer` receives an [`IterationEvent`] after every iteration.
    pub fn run<F>(
        &mut self,
        image: &ScalarImage,
        mask: Option<&MaskImage>,
        mut observer: F,
    ) -> Result<BiasFieldEstimate>
    where
        F: FnMut(&IterationEvent),
    {
        self.state = DriverState::Initializing;
        self.monitor = ConvergenceMonitor::new(self.params.convergence_threshold, self.params.max_iterations);

        let (working, fitter) = match self.initialize(image, mask) {
            Ok(init) => init,
            Err(e) => {
                self.state = DriverState::Failed;
                return Err(e);
            }
        };

        let sharpener = Sharpener::new(self.params.bias_field_fwhm, self.params.wiener_filter_noise);
        let mut total = fitter.final_lattice();
        let mut current = working.log_input.clone();
        let mut measurement = f64::INFINITY;

        let mut mapping: Option<IntensityMapping> = None;
        let mut increment: Option<ControlPointLattice> = None;

        self.state = if self.params.max_iterations == 0 {
            DriverState::MaxIterationsReached
        } else {
            DriverState::IteratingHistogram
        };

        while !self.state.is_terminal() {
            let iteration = self.monitor.iteration() + 1;
            let step: Result<DriverState> = match self.state {
                DriverState::IteratingHistogram => {
                    match LogHistogram::build(&current, self.params.histogram_bins) {
                        Ok(hist) => sharpener.sharpen(&hist).map(|m| {
                            mapping = Some(m);
                            DriverState::IteratingFit
                        }),
                        // Field fully removed after at least one pass
                        Err(N3Error::Domain(msg)) if iteration > 1 => {
                            debug!("log intensity range collapsed ({}), stopping", msg);
                            Ok(DriverState::Converged)
                        }
                        Err(e) => Err(e),
                    }
                }
                DriverState::IteratingFit => match mapping.take() {
                    Some(m) => {
                        let samples = sample_residual_field(&current, &working.positions, &m);
                        fitter.fit(&samples).map(|lattice| {
                            increment = Some(lattice);
                            DriverState::IteratingApply
                        })
                    }
                    None => Ok(DriverState::IteratingHistogram),
                },
                DriverState::IteratingApply => match increment.take() {
                    Some(inc) => total.add_assign(&inc).map(|_| {
                        let field = total.evaluate_positions(&working.positions);
                        for ((c, &l), &f) in current.iter_mut().zip(working.log_input.iter()).zip(field.iter()) {
                            *c = l - f;
                        }

                        let check = self.monitor.record(&field);
                        measurement = check.measurement;
                        debug!(
                            "iteration {}: field CV {:.6}, convergence {:.6e}",
                            iteration, check.cv, check.measurement
                        );
                        observer(&IterationEvent {
                            iteration,
                            convergence_measurement: check.measurement,
                            coefficient_of_variation: check.cv,
                        });

                        if check.converged {
                            DriverState::Converged
                        } else if self.monitor.exhausted() {
                            DriverState::MaxIterationsReached
                        } else {
                            DriverState::IteratingHistogram
                        }
                    }),
                    None => Ok(DriverState::IteratingHistogram),
                },
                other => Ok(other),
            };

            match step {
                Ok(next) => self.state = next,
                Err(e) => {
                    self.state = DriverState::Failed;
                    return Err(match e {
                        N3Error::NumericalInstability(_) => {
                            warn!("iteration {} failed: {}", iteration, e);
                            N3Error::Aborted {
                                iteration,
                                cause: Box::new(e),
                                partial: Box::new(total),
                            }
                        }
                        other => other,
                    });
                }
            }
        }

        let termination = match self.state {
            DriverState::Converged => Termination::Converged,
            _ => Termination::MaxIterationsReached,
        };
        let iterations = self.monitor.iteration();
        match termination {
            Termination::Converged => info!(
                "N3 converged after {} iterations (measurement {:.3e})",
                iterations, measurement
            ),
            Termination::MaxIterationsReached => warn!(
                "N3 stopped at the iteration cap ({}) without converging (measurement {:.3e})",
                iterations, measurement
            ),
        }

        Ok(BiasFieldEstimate {
            lattice: total,
            iterations,
            convergence_measurement: measurement,
            termination,
        })
    }

    /// Validate inputs, shrink to working resolution and collect the foreground
    fn initialize(
        &self,
        image: &ScalarImage,
        mask: Option<&MaskImage>,
    ) -> Result<(WorkingSet, BSplineFitter)> {
        let params = &self.params;
        params.validate()?;

        let dims = image.dims();
        let label = params.mask_label;
        let auto_mask;
        let mask = match mask {
            Some(m) => {
                if m.geometry.dims != dims {
                    return Err(N3Error::Domain(format!(
                        "mask dimensions {:?} differ from image dimensions {:?}",
                        m.geometry.dims, dims
                    )));
                }
                m
            }
            None => {
                auto_mask = threshold_mask(image, AUTO_MASK_THRESHOLD, label);
                &auto_mask
            }
        };

        let factors = params.shrink_factor;
        let (work_image, work_mask) = if factors == [1, 1, 1] {
            (None, None)
        } else {
            (Some(image.shrink(factors)), Some(mask.shrink(factors)))
        };
        let work_image = work_image.as_ref().unwrap_or(image);
        let work_mask = work_mask.as_ref().unwrap_or(mask);
        let [wx, wy, wz] = work_image.dims();

        info!(
            "N3 on {:?} voxels, working grid {:?}, {} bins, order {}, levels {:?}",
            dims,
            [wx, wy, wz],
            params.histogram_bins,
            params.spline_order,
            params.fitting_levels
        );

        let mut log_input = Vec::new();
        let mut positions = Vec::new();
        let mut excluded = 0usize;
        for k in 0..wz {
            for j in 0..wy {
                for i in 0..wx {
                    let idx = i + j * wx + k * wx * wy;
                    if work_mask.labels[idx] != label {
                        continue;
                    }
                    let v = work_image.data[idx];
                    if !(v.is_finite() && v > 0.0) {
                        excluded += 1;
                        continue;
                    }
                    log_input.push(v.ln());
                    positions.push([
                        shrunk_source_index(i, factors[0], dims[0]) as f64,
                        shrunk_source_index(j, factors[1], dims[1]) as f64,
                        shrunk_source_index(k, factors[2], dims[2]) as f64,
                    ]);
                }
            }
        }

        if excluded > 0 {
            warn!("{} foreground voxels without positive intensity were excluded", excluded);
        }
        if log_input.len() < 2 {
            return Err(N3Error::Domain(format!(
                "foreground with label {} has {} usable voxels, need at least 2",
                label,
                log_input.len()
            )));
        }
        debug!("{} foreground voxels at working resolution", log_input.len());

        let fitter = BSplineFitter::from_params(params, dims);
        Ok((WorkingSet { log_input, positions }, fitter))
    }
}

/// N3 bias field correction
///
/// # Arguments
/// * `image` - Input intensities (must be positive inside the foreground)
/// * `mask` - Foreground labels; `None` thresholds the input at 1
/// * `params` - Algorithm parameters
///
/// # Returns
/// Accumulated log bias field lattice and the corrected image
pub fn n3_bias_correction(
    image: &ScalarImage,
    mask: Option<&MaskImage>,
    params: &N3Params,
) -> Result<N3Output> {
    n3_bias_correction_with_progress(image, mask, params, |_| {})
}

/// N3 bias field correction with an iteration observer
///
/// Same as [`n3_bias_correction`] but calls `observer` after every iteration.
pub fn n3_bias_correction_with_progress<F>(
    image: &ScalarImage,
    mask: Option<&MaskImage>,
    params: &N3Params,
    observer: F,
) -> Result<N3Output>
where
    F: FnMut(&IterationEvent),
{
    let mut driver = IterationDriver::new(params.clone());
    let estimate = driver.run(image, mask, observer)?;
    let corrected = match correct_image(image, &estimate.lattice) {
        Ok(c) => c,
        Err(e @ N3Error::NumericalInstability(_)) => {
            warn!("applying the bias field failed: {}", e);
            return Err(N3Error::Aborted {
                iteration: estimate.iterations,
                cause: Box::new(e),
                partial: Box::new(estimate.lattice),
            });
        }
        Err(e) => return Err(e),
    };

    Ok(N3Output {
        lattice: estimate.lattice,
        corrected,
        iterations: estimate.iterations,
        convergence_measurement: estimate.convergence_measurement,
        termination: estimate.termination,
    })
}
