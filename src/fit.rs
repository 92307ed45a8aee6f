use std::ops::Range;

use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{Executor, Jacobian, Operator, State};
use argmin::solver::gaussnewton::GaussNewtonLS;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1};
use ndarray_linalg::Inverse;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Parameters of an exponential response fit
///
/// `delay` and `gap` are fixed by the caller, only the amplitude and time constant are
/// estimated. The initial guess, tolerance and iteration cap are part of the configuration so
/// that a fit can be reproduced exactly.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FitConfig {
    /// Sample index on the marker-aligned axis where the fit window starts
    pub delay: usize,
    /// Level the response rises from, on the scale of the fitted series
    pub gap: f64,
    /// Requested end of the fit window (exclusive), clamped to the series length
    pub end_index: usize,
    /// Copies of the first post-marker sample placed before it on the marker-aligned axis
    #[serde(default = "default_lead_in")]
    pub lead_in: usize,
    pub initial_amplitude: f64,
    pub initial_time_constant: f64,
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,
    /// Convergence threshold on the change of the cost between iterations
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub target: FitTarget,
    /// Log every solver iteration to the terminal
    #[serde(default)]
    pub trace: bool,
}

const fn default_lead_in() -> usize {
    10
}

const fn default_max_iters() -> u64 {
    100
}

fn default_tolerance() -> f64 {
    f64::EPSILON.sqrt()
}

/// Which series of a subject the response model is fitted to
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FitTarget {
    Raw,
    #[default]
    Delta,
}

/// Outcome of fitting `y(t) = B (1 - exp(-(t - delay) / tau)) + gap`
#[derive(Clone, Debug)]
pub struct FitResult {
    /// Asymptotic amplitude `B`
    pub amplitude: f64,
    /// Time constant `tau`, in samples
    pub time_constant: f64,
    /// Parameter covariance, ordered (amplitude, time constant). Infinite when the data do not
    /// determine it.
    pub covariance: Array2<f64>,
    /// Coefficient of determination over the fit window
    pub r_squared: f64,
    /// Samples the fit was run over
    pub window: Range<usize>,
    pub delay: usize,
    pub gap: f64,
}

impl FitResult {
    /// Value of the fitted model at `t`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, t: f64) -> f64 {
        response(t, self.delay as f64, self.gap, self.amplitude, self.time_constant)
    }

    /// One standard deviation uncertainty of (amplitude, time constant)
    #[must_use]
    pub fn standard_errors(&self) -> (f64, f64) {
        (
            self.covariance[[0, 0]].sqrt(),
            self.covariance[[1, 1]].sqrt(),
        )
    }
}

fn response(t: f64, delay: f64, gap: f64, amplitude: f64, time_constant: f64) -> f64 {
    amplitude.mul_add(1. - (-(t - delay) / time_constant).exp(), gap)
}

/// Put a post-marker series on the marker-aligned axis: `lead_in` copies of its first sample
/// followed by the series itself
#[must_use]
pub fn aligned(post_marker: ArrayView1<'_, f64>, lead_in: usize) -> Array1<f64> {
    let Some(&first) = post_marker.first() else {
        return Array1::zeros(0);
    };
    std::iter::repeat(first)
        .take(lead_in)
        .chain(post_marker.iter().copied())
        .collect()
}

/// Fit the exponential response model to `series` over `[delay, end_index)`
///
/// The sample index is the time axis. `subject` only labels errors and log lines.
///
/// # Errors
/// Returns [`Error::InsufficientRows`] if the clamped window holds fewer than two samples,
/// [`Error::FitDidNotConverge`] if the solver fails or runs out of iterations and
/// [`Error::NonFiniteGoodness`] if the window has no variance or the coefficient of
/// determination is not finite.
#[allow(clippy::cast_precision_loss)]
pub fn fit(series: ArrayView1<'_, f64>, config: &FitConfig, subject: &str) -> Result<FitResult> {
    let end = config.end_index.min(series.len());
    if end < config.delay + 2 {
        return Err(Error::InsufficientRows {
            requested: config.delay + 2,
            available: end,
        });
    }
    let window = config.delay..end;
    debug!("fitting `{subject}` over samples {window:?}");

    let problem = ResponseProblem {
        t: window.clone().map(|t| t as f64).collect(),
        y: series.slice(s![window.clone()]).to_owned(),
        delay: config.delay as f64,
        gap: config.gap,
    };
    let non_finite = || Error::NonFiniteGoodness {
        subject: subject.to_owned(),
    };

    // R2 is undefined for a window without variance, whatever the fit
    let ss_tot = problem.y.var(0.) * problem.y.len() as f64;
    if !(ss_tot.is_finite() && ss_tot > 0.) {
        return Err(non_finite());
    }

    let param = problem.clone().solve(config, subject)?;
    let (amplitude, time_constant) = (param[0], param[1]);

    let fitted = problem.compute(&param);
    let ss_res = (&problem.y - &fitted).mapv(|r| r * r).sum();
    let r_squared = 1. - ss_res / ss_tot;
    if !r_squared.is_finite() {
        return Err(non_finite());
    }

    let covariance = problem.covariance(&param, ss_res);

    info!("fit `{subject}`: B = {amplitude:.3}, tau = {time_constant:.3}, R2 = {r_squared:.4}");

    Ok(FitResult {
        amplitude,
        time_constant,
        covariance,
        r_squared,
        window,
        delay: config.delay,
        gap: config.gap,
    })
}

#[derive(Clone)]
struct ResponseProblem {
    /// Sample indices of the fit window
    t: Array1<f64>,
    /// Observed samples
    y: Array1<f64>,
    delay: f64,
    gap: f64,
}

impl ResponseProblem {
    /// Model values at every `t` for parameters (amplitude, time constant)
    fn compute(&self, params: &Array1<f64>) -> Array1<f64> {
        self.t
            .mapv(|t| response(t, self.delay, self.gap, params[0], params[1]))
    }

    /// Derivatives of the model with respect to (amplitude, time constant), one row per sample
    fn jacobian_matrix(&self, params: &Array1<f64>) -> Array2<f64> {
        let (amplitude, time_constant) = (params[0], params[1]);
        let mut jacobian = Array2::zeros((self.t.len(), 2));
        for (ii, t) in self.t.iter().enumerate() {
            let elapsed = t - self.delay;
            let decay = (-elapsed / time_constant).exp();
            jacobian[[ii, 0]] = 1. - decay;
            jacobian[[ii, 1]] = -amplitude * elapsed * decay / time_constant.powi(2);
        }
        jacobian
    }

    /// Parameter covariance scaled by the residual variance
    #[allow(clippy::cast_precision_loss)]
    fn covariance(&self, params: &Array1<f64>, ss_res: f64) -> Array2<f64> {
        let undetermined = Array2::from_elem((2, 2), f64::INFINITY);
        let dof = self.t.len().saturating_sub(2);
        if dof == 0 {
            return undetermined;
        }
        let jacobian = self.jacobian_matrix(params);
        let normal = jacobian.t().dot(&jacobian);
        normal
            .inv()
            .map_or(undetermined, |inverse| inverse * (ss_res / dof as f64))
    }

    /// Run the optimisation from the configured initial guess
    fn solve(self, config: &FitConfig, subject: &str) -> Result<Array1<f64>> {
        let not_converged = |reason: String| Error::FitDidNotConverge {
            subject: subject.to_owned(),
            reason,
        };

        let linesearch = MoreThuenteLineSearch::new()
            .with_bounds(0.0, 1.0)
            .map_err(|err| not_converged(err.to_string()))?;
        let solver = GaussNewtonLS::new(linesearch)
            .with_tolerance(config.tolerance)
            .map_err(|err| not_converged(err.to_string()))?;

        let initial_parameters =
            Array1::from(vec![config.initial_amplitude, config.initial_time_constant]);
        let max_iters = config.max_iters;

        let mut executor = Executor::new(self, solver)
            .configure(|state| state.param(initial_parameters).max_iters(max_iters));
        if config.trace {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor
            .run()
            .map_err(|err| not_converged(err.to_string()))?;

        let state = res.state();
        if state.get_iter() >= max_iters {
            return Err(not_converged(format!(
                "no convergence within {max_iters} iterations"
            )));
        }
        debug!("`{subject}` converged after {} iterations", state.get_iter());

        state
            .get_best_param()
            .cloned()
            .filter(|param| param.iter().all(|p| p.is_finite()))
            .ok_or_else(|| not_converged("solver returned no finite parameters".to_owned()))
    }
}

impl Operator for ResponseProblem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.compute(p) - &self.y)
    }
}

impl Jacobian for ResponseProblem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.jacobian_matrix(p))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, Array, Array1};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    use super::{aligned, fit, response, FitConfig, FitTarget, ResponseProblem};
    use crate::Error;

    fn config(delay: usize, gap: f64, end_index: usize, initial: (f64, f64)) -> FitConfig {
        FitConfig {
            delay,
            gap,
            end_index,
            lead_in: 10,
            initial_amplitude: initial.0,
            initial_time_constant: initial.1,
            max_iters: 100,
            tolerance: f64::EPSILON.sqrt(),
            target: FitTarget::Delta,
            trace: false,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn synthetic(
        len: usize,
        delay: f64,
        gap: f64,
        amplitude: f64,
        time_constant: f64,
    ) -> Array1<f64> {
        Array::from_iter(
            (0..len).map(|t| response(t as f64, delay, gap, amplitude, time_constant)),
        )
    }

    #[test]
    fn noiseless_response_parameters_are_recovered() {
        let series = synthetic(31, 5., 40., 100., 3.);

        let result = fit(series.view(), &config(5, 40., 31, (80., 2.)), "synthetic").unwrap();

        approx::assert_relative_eq!(result.amplitude, 100., max_relative = 1e-2);
        approx::assert_relative_eq!(result.time_constant, 3., max_relative = 1e-2);
        assert!(result.r_squared > 0.999);
        assert_eq!(result.window, 5..31);
        approx::assert_relative_eq!(result.evaluate(20.), series[20], max_relative = 1e-3);
    }

    #[test]
    fn fit_window_is_clamped_to_the_series() {
        let series = synthetic(50, 5., 40., 100., 3.);

        let result = fit(series.view(), &config(5, 40., 1000, (80., 2.)), "clamped").unwrap();

        assert_eq!(result.window, 5..50);
    }

    #[test]
    fn noisy_response_parameters_are_recovered() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let clean = synthetic(88, 19., -25., 300., 6.);
        let noise = Array::random_using(clean.len(), Uniform::new(-2., 2.), &mut rng);
        let series = clean + noise;

        let result = fit(series.view(), &config(19, -25., 88, (250., 4.)), "noisy").unwrap();

        approx::assert_relative_eq!(result.amplitude, 300., max_relative = 2e-2);
        approx::assert_relative_eq!(result.time_constant, 6., max_relative = 5e-2);
        assert!(result.r_squared > 0.99);
        let (amplitude_error, time_constant_error) = result.standard_errors();
        assert!(amplitude_error.is_finite() && amplitude_error > 0.);
        assert!(time_constant_error.is_finite() && time_constant_error > 0.);
    }

    #[test]
    fn short_window_is_rejected() {
        let series = synthetic(6, 5., 40., 100., 3.);
        assert!(matches!(
            fit(series.view(), &config(5, 40., 30, (80., 2.)), "short"),
            Err(Error::InsufficientRows {
                requested: 7,
                available: 6
            })
        ));
    }

    #[test]
    fn flat_series_has_no_finite_goodness_of_fit() {
        let series = Array1::from_elem(30, 40.);
        assert!(matches!(
            fit(series.view(), &config(5, 40., 30, (80., 2.)), "flat"),
            Err(Error::NonFiniteGoodness { subject }) if subject == "flat"
        ));
    }

    #[test]
    fn iteration_cap_is_reported_as_non_convergence() {
        let series = synthetic(88, 19., -25., 300., 6.);
        let mut capped = config(19, -25., 88, (250., 4.));
        capped.max_iters = 1;

        assert!(matches!(
            fit(series.view(), &capped, "capped"),
            Err(Error::FitDidNotConverge { subject, .. }) if subject == "capped"
        ));
    }

    #[test]
    fn aligned_series_repeats_the_first_post_marker_sample() {
        let post = arr1(&[3., 4., 5.]);
        assert_eq!(aligned(post.view(), 2), arr1(&[3., 3., 3., 4., 5.]));
        assert_eq!(aligned(arr1(&[]).view(), 2).len(), 0);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn jacobian_matches_finite_difference() {
        let problem = ResponseProblem {
            t: Array::from_iter((5..40).map(|t| t as f64)),
            y: Array1::zeros(35),
            delay: 5.,
            gap: 40.,
        };
        let params = arr1(&[120., 4.5]);
        let computed = problem.jacobian_matrix(&params);

        let delta_rel = 1e-6;
        for jj in 0..2 {
            let delta = params[jj] * delta_rel;
            let mut plus = params.clone();
            plus[jj] += delta;
            let mut minus = params.clone();
            minus[jj] -= delta;

            let numerical = (problem.compute(&plus) - problem.compute(&minus)) / (2. * delta);

            for (comp, num) in computed.column(jj).iter().zip(numerical.iter()) {
                approx::assert_relative_eq!(*comp, *num, max_relative = 1e-4, epsilon = 1e-9);
            }
        }
    }
}
