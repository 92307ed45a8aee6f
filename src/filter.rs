use std::f64::consts::{PI, SQRT_2};

use ndarray::{s, Array1, ArrayView1, ArrayView2, Axis};
use sci_rs::signal::filter::design::Sos;
use sci_rs::signal::filter::sosfilt_dyn;
use serde::{Deserialize, Serialize};

use crate::aggregate::maximum;
use crate::{Error, Result};

/// Low-pass smoothing used before extracting each subject's peak value
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct FilterConfig {
    /// Cutoff frequency in Hz
    pub cutoff: f64,
    /// Sampling frequency in Hz
    pub sample_rate: f64,
    /// Leading filtered samples discarded while the filter settles
    pub settle: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.2,
            sample_rate: 1.0,
            settle: 5,
        }
    }
}

/// Second order Butterworth low-pass, designed by bilinear transform with a pre-warped cutoff
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LowPass {
    /// Numerator coefficients
    b: [f64; 3],
    /// Denominator coefficients, `a[0]` normalised to one
    a: [f64; 3],
}

impl LowPass {
    /// # Errors
    /// Returns [`Error::InvalidFilter`] unless `0 < cutoff < sample_rate / 2`.
    pub fn butterworth(cutoff: f64, sample_rate: f64) -> Result<Self> {
        if !(cutoff > 0. && cutoff < sample_rate / 2.) {
            return Err(Error::InvalidFilter {
                cutoff,
                sample_rate,
            });
        }

        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1. / (1. + SQRT_2 * k + k2);
        let b0 = k2 * norm;

        Ok(Self {
            b: [b0, 2. * b0, b0],
            a: [1., 2. * (k2 - 1.) * norm, (1. - SQRT_2 * k + k2) * norm],
        })
    }

    /// Run the filter forward over `signal` from rest (zero initial state)
    #[must_use]
    pub fn apply(&self, signal: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut sections = [Sos::new(self.b, self.a)];
        Array1::from(sosfilt_dyn(signal.iter(), &mut sections))
    }

    #[must_use]
    pub const fn coefficients(&self) -> ([f64; 3], [f64; 3]) {
        (self.b, self.a)
    }
}

/// Peak of every subject's low-pass filtered series after the marker
///
/// Each column of `values` is filtered independently, whichever device it comes from. The
/// maximum is taken from the marker position, or from the end of the settling transient if that
/// comes later. Earlier analyses cut the transient first and then counted the marker position
/// into the cut series, starting the window `settle` samples late, and took the reference
/// device's peak unfiltered; neither is reproduced here.
///
/// # Errors
/// Returns [`Error::InvalidFilter`] for an invalid cutoff and [`Error::InsufficientRows`] if no
/// sample is left to take the maximum over.
pub fn filtered_peaks(
    values: ArrayView2<'_, f64>,
    marker_position: usize,
    config: &FilterConfig,
) -> Result<Array1<f64>> {
    let filter = LowPass::butterworth(config.cutoff, config.sample_rate)?;
    let start = marker_position.max(config.settle);
    if start >= values.nrows() {
        return Err(Error::InsufficientRows {
            requested: start + 1,
            available: values.nrows(),
        });
    }

    Ok(values.map_axis(Axis(0), |column| {
        let filtered = filter.apply(column);
        maximum(filtered.slice(s![start..])).unwrap_or(f64::NAN)
    }))
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, Array1, Array2};

    use super::{filtered_peaks, FilterConfig, LowPass};
    use crate::Error;

    #[test]
    fn coefficients_match_the_reference_design() {
        // Reference values for a second order Butterworth at 0.2 Hz sampled at 1 Hz
        let filter = LowPass::butterworth(0.2, 1.0).unwrap();
        let (b, a) = filter.coefficients();

        let expected_b = [0.206_572_08, 0.413_144_17, 0.206_572_08];
        let expected_a = [1.0, -0.369_527_38, 0.195_815_71];
        for (computed, expected) in b.iter().zip(expected_b).chain(a.iter().zip(expected_a)) {
            approx::assert_relative_eq!(*computed, expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn impulse_response_follows_the_difference_equation() {
        let filter = LowPass::butterworth(0.2, 1.0).unwrap();
        let ([b0, b1, b2], [_, a1, a2]) = filter.coefficients();
        let mut impulse = Array1::zeros(4);
        impulse[0] = 1.;

        let response = filter.apply(impulse.view());

        let y0 = b0;
        let y1 = b1 - a1 * y0;
        let y2 = b2 - a1 * y1 - a2 * y0;
        let y3 = -a1 * y2 - a2 * y1;
        for (computed, expected) in response.iter().zip([y0, y1, y2, y3]) {
            approx::assert_relative_eq!(*computed, expected, max_relative = 1e-9);
        }
    }

    #[test]
    fn constant_signal_passes_at_unit_gain() {
        let filter = LowPass::butterworth(0.2, 1.0).unwrap();
        let signal = Array1::from_elem(60, 1480.);

        let filtered = filter.apply(signal.view());

        // Starts from rest, so the first output is attenuated
        assert!(filtered[0] < 1480.);
        approx::assert_relative_eq!(filtered[59], 1480., max_relative = 1e-9);
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        assert!(matches!(
            LowPass::butterworth(0.6, 1.0),
            Err(Error::InvalidFilter { .. })
        ));
        assert!(LowPass::butterworth(0., 1.0).is_err());
    }

    #[test]
    fn isolated_spikes_are_smoothed_before_the_peak_is_taken() {
        let mut values = Array2::from_elem((40, 2), 100.);
        values[[20, 0]] = 180.;
        for ii in 20..40 {
            values[[ii, 1]] = 150.;
        }

        let peaks = filtered_peaks(values.view(), 10, &FilterConfig::default()).unwrap();

        assert!(peaks[0] < 150.);
        assert!(peaks[0] > 100.);
        // A sustained rise reaches its level, Butterworth overshoot included
        assert!(peaks[1] > 149.9);
        assert!(peaks[1] < 155.);
    }

    #[test]
    fn peak_window_past_the_series_is_rejected() {
        let values = arr2(&[[1.], [2.], [3.]]);
        assert!(matches!(
            filtered_peaks(values.view(), 1, &FilterConfig::default()),
            Err(Error::InsufficientRows { .. })
        ));
    }
}
