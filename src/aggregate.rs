use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the per-subject normalized deltas are combined at a timepoint
///
/// Earlier analyses disagreed on whether the combined normalized value is divided by the number
/// of subjects, so both are offered and the choice is made once per study.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Sum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    Median,
    /// Sample standard deviation (n - 1 denominator)
    StandardDeviation,
    Sum,
}

impl Statistic {
    const fn required_subjects(self) -> usize {
        match self {
            Self::StandardDeviation => 2,
            Self::Mean | Self::Median | Self::Sum => 1,
        }
    }
}

impl From<Aggregation> for Statistic {
    fn from(value: Aggregation) -> Self {
        match value {
            Aggregation::Mean => Self::Mean,
            Aggregation::Sum => Self::Sum,
        }
    }
}

/// Reduce every timepoint (row) of `matrix` over its subjects (columns)
///
/// # Errors
/// Returns [`Error::InsufficientSubjects`] if there are fewer subjects than `statistic` needs:
/// one for all statistics and two for the standard deviation.
pub fn across_subjects<E: Float + FromPrimitive>(
    matrix: ArrayView2<'_, E>,
    statistic: Statistic,
) -> Result<Array1<E>> {
    let required = statistic.required_subjects();
    if matrix.ncols() < required {
        return Err(Error::InsufficientSubjects {
            timepoint: 0,
            available: matrix.ncols(),
            required,
        });
    }

    let subjects = Axis(1);
    Ok(match statistic {
        Statistic::Mean => matrix.mean_axis(subjects).unwrap_or_else(|| Array1::zeros(0)),
        Statistic::Median => matrix.map_axis(subjects, |row| median(row).unwrap_or_else(E::nan)),
        Statistic::StandardDeviation => matrix.std_axis(subjects, E::one()),
        Statistic::Sum => matrix.sum_axis(subjects),
    })
}

/// Mean, median and spread of one matrix, one value per timepoint
#[derive(Clone, Debug)]
pub struct Summary<E> {
    pub mean: Array1<E>,
    pub median: Array1<E>,
    pub standard_deviation: Array1<E>,
}

impl<E: Float + FromPrimitive> Summary<E> {
    /// # Errors
    /// Returns [`Error::InsufficientSubjects`] if the matrix has fewer than two subjects.
    pub fn compute(matrix: ArrayView2<'_, E>) -> Result<Self> {
        Ok(Self {
            mean: across_subjects(matrix, Statistic::Mean)?,
            median: across_subjects(matrix, Statistic::Median)?,
            standard_deviation: across_subjects(matrix, Statistic::StandardDeviation)?,
        })
    }
}

pub(crate) fn median<E: Float>(values: ArrayView1<'_, E>) -> Option<E> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / E::from(2)?)
    } else {
        Some(sorted[mid])
    }
}

/// Maximum of a series, ignoring NaN
pub(crate) fn maximum<E: Float>(values: ArrayView1<'_, E>) -> Option<E> {
    values
        .iter()
        .copied()
        .filter(|value| !value.is_nan())
        .reduce(E::max)
}
