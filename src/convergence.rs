//! Convergence monitoring
//!
//! The statistic is the coefficient of variation of the multiplicative bias
//! field exp(log field) over the foreground. Iteration stops once its
//! relative change between successive iterations drops below the threshold.

/// Mean, standard deviation and coefficient of variation of a sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub std: f64,
    pub cv: f64,
}

impl Statistics {
    /// Population statistics of `values`
    pub fn of(values: impl Iterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.collect();
        if values.is_empty() {
            return Self { mean: 0.0, std: 0.0, cv: 0.0 };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        let cv = if mean != 0.0 { std / mean.abs() } else { 0.0 };
        Self { mean, std, cv }
    }

    /// Statistics of `data` over voxels labelled `label`
    pub fn masked(data: &[f64], labels: &[u8], label: u8) -> Self {
        Self::of(
            data.iter()
                .zip(labels.iter())
                .filter(|(_, &l)| l == label)
                .map(|(&v, _)| v),
        )
    }
}

/// Outcome of recording one iteration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvergenceCheck {
    /// Relative change of the CV (infinite on the first iteration)
    pub measurement: f64,
    pub cv: f64,
    pub converged: bool,
}

/// Tracks the field CV across iterations
#[derive(Clone, Debug)]
pub struct ConvergenceMonitor {
    threshold: f64,
    max_iterations: usize,
    iteration: usize,
    previous_cv: Option<f64>,
    current_cv: Option<f64>,
}

impl ConvergenceMonitor {
    pub fn new(threshold: f64, max_iterations: usize) -> Self {
        Self {
            threshold,
            max_iterations,
            iteration: 0,
            previous_cv: None,
            current_cv: None,
        }
    }

    /// Record the log bias field over the foreground after an iteration
    pub fn record(&mut self, log_field: &[f64]) -> ConvergenceCheck {
        let cv = Statistics::of(log_field.iter().map(|f| f.exp())).cv;
        self.iteration += 1;
        self.previous_cv = self.current_cv;
        self.current_cv = Some(cv);

        let measurement = match self.previous_cv {
            None => f64::INFINITY,
            Some(prev) if prev > 0.0 => (cv - prev).abs() / prev,
            Some(prev) => (cv - prev).abs(),
        };

        ConvergenceCheck {
            measurement,
            cv,
            converged: measurement < self.threshold,
        }
    }

    /// Completed iterations
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// True once the iteration cap is reached
    pub fn exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    pub fn previous_cv(&self) -> Option<f64> {
        self.previous_cv
    }

    pub fn current_cv(&self) -> Option<f64> {
        self.current_cv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics() {
        let s = Statistics::of([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter());
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.std - 2.0).abs() < 1e-12);
        assert!((s.cv - 0.4).abs() < 1e-12);

        let m = Statistics::masked(&[1.0, 100.0, 3.0], &[1, 0, 1], 1);
        assert!((m.mean - 2.0).abs() < 1e-12);
        assert_eq!(Statistics::of(std::iter::empty()).cv, 0.0);
    }

    #[test]
    fn test_first_iteration_never_converges() {
        let mut mon = ConvergenceMonitor::new(0.5, 10);
        let check = mon.record(&[0.0, 0.1, -0.1]);
        assert!(check.measurement.is_infinite());
        assert!(!check.converged);
        assert_eq!(mon.iteration(), 1);
    }

    #[test]
    fn test_relative_change() {
        let mut mon = ConvergenceMonitor::new(0.01, 10);
        mon.record(&[0.0, 0.1, -0.1]);
        let same = mon.record(&[0.0, 0.1, -0.1]);
        assert!(same.measurement < 1e-12);
        assert!(same.converged);

        let bigger = mon.record(&[0.0, 0.2, -0.2]);
        assert!(bigger.measurement > 0.9, "CV roughly doubles: {}", bigger.measurement);
        assert!(!bigger.converged);
        assert_eq!(mon.previous_cv(), Some(same.cv));
    }

    #[test]
    fn test_flat_field_uses_absolute_change() {
        let mut mon = ConvergenceMonitor::new(0.001, 10);
        mon.record(&[0.3, 0.3]);
        let check = mon.record(&[0.3, 0.3]);
        assert_eq!(check.cv, 0.0);
        assert_eq!(check.measurement, 0.0);
        assert!(check.converged);
    }

    #[test]
    fn test_exhausted() {
        let mut mon = ConvergenceMonitor::new(0.0, 2);
        assert!(!mon.exhausted());
        mon.record(&[0.0, 1.0]);
        mon.record(&[0.0, 1.0]);
        assert!(mon.exhausted());
    }
}
