use ndarray::{Array1, ArrayView1, Zip};

use crate::{Error, Result};

/// Limits of agreement are the mean difference plus or minus this many standard deviations
pub const LIMITS_OF_AGREEMENT_SD: f64 = 1.96;

/// Bland-Altman comparison of two devices measuring the same quantity
#[derive(Clone, Debug)]
pub struct BlandAltman {
    /// Mean of each pair
    pub means: Array1<f64>,
    /// Difference of each pair, first device minus second
    pub differences: Array1<f64>,
    pub mean_difference: f64,
    /// Population standard deviation of the differences
    pub sd_difference: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
}

impl BlandAltman {
    /// # Errors
    /// Returns [`Error::MismatchedLengths`] if the series are not paired and
    /// [`Error::InsufficientRows`] if they are empty.
    pub fn compute(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<Self> {
        check_paired(a, b, 1)?;

        let means = Zip::from(a).and(b).map_collect(|a, b| (a + b) / 2.);
        let differences = &a - &b;

        let mean_difference = differences.mean().unwrap_or(f64::NAN);
        let sd_difference = differences.std(0.);
        let spread = LIMITS_OF_AGREEMENT_SD * sd_difference;

        Ok(Self {
            means,
            differences,
            mean_difference,
            sd_difference,
            lower_limit: mean_difference - spread,
            upper_limit: mean_difference + spread,
        })
    }

    /// Number of pairs lying outside the limits of agreement
    #[must_use]
    pub fn outliers(&self) -> usize {
        self.differences
            .iter()
            .filter(|&&d| d < self.lower_limit || d > self.upper_limit)
            .count()
    }
}

/// Pearson correlation coefficient of paired samples
///
/// A series without variance has no defined correlation and gives NaN.
///
/// # Errors
/// Returns [`Error::MismatchedLengths`] if the series are not paired and
/// [`Error::InsufficientRows`] if there are fewer than two pairs.
pub fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<f64> {
    check_paired(a, b, 2)?;

    let mean_a = a.mean().unwrap_or(f64::NAN);
    let mean_b = b.mean().unwrap_or(f64::NAN);
    let (covariance, var_a, var_b) = a.iter().zip(b.iter()).fold(
        (0., 0., 0.),
        |(cov, va, vb), (x, y)| {
            let (dx, dy) = (x - mean_a, y - mean_b);
            (dx.mul_add(dy, cov), dx.mul_add(dx, va), dy.mul_add(dy, vb))
        },
    );

    Ok(covariance / (var_a * var_b).sqrt())
}

fn check_paired(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, required: usize) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::MismatchedLengths {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.len() < required {
        return Err(Error::InsufficientRows {
            requested: required,
            available: a.len(),
        });
    }
    Ok(())
}
