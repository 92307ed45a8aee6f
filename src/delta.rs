use log::debug;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::session::Session;
use crate::{Error, Result};

/// Baseline-relative view of a session
///
/// Both matrices keep full precision, rounding only happens when they are written out.
#[derive(Clone, Debug)]
pub struct DeltaSeries {
    /// Sample minus the subject's baseline, timepoints x subjects
    pub delta: Array2<f64>,
    /// Delta as a percentage of the subject's baseline, timepoints x subjects
    pub normalized: Array2<f64>,
}

impl DeltaSeries {
    /// # Errors
    /// Returns [`Error::InvalidBaseline`] if any subject's baseline is zero or not finite.
    pub fn from_session(session: &Session) -> Result<Self> {
        let delta = deltas(session.values().view(), session.baseline().view());
        let normalized = normalize(delta.view(), session.baseline().view(), session.subjects())?;
        Ok(Self { delta, normalized })
    }
}

/// Subtract each subject's baseline from every one of its samples
#[must_use]
pub fn deltas(values: ArrayView2<'_, f64>, baseline: ArrayView1<'_, f64>) -> Array2<f64> {
    let mut delta = values.to_owned();
    delta -= &baseline;
    delta
}

/// Express each delta as a percentage of its subject's baseline
///
/// # Errors
/// Returns [`Error::InvalidBaseline`] naming the first subject whose baseline is zero or not
/// finite.
pub fn normalize(
    deltas: ArrayView2<'_, f64>,
    baseline: ArrayView1<'_, f64>,
    subjects: &[String],
) -> Result<Array2<f64>> {
    if let Some((jj, value)) = baseline
        .iter()
        .enumerate()
        .find(|(_, value)| **value == 0. || !value.is_finite())
    {
        return Err(Error::InvalidBaseline {
            subject: subjects.get(jj).cloned().unwrap_or_else(|| jj.to_string()),
            value: *value,
        });
    }

    let mut normalized = deltas.to_owned();
    normalized /= &baseline;
    normalized *= 100.;
    Ok(normalized)
}

/// Largest delta of every subject from `lead` samples before the marker position to the end of
/// the session
///
/// `lead` exists because the row indices of the cleaned session are shifted with respect to the
/// file by the rows dropped during cleaning; the window has to start on the baseline row, which
/// is one row above the marker position.
///
/// # Errors
/// Returns [`Error::InsufficientRows`] if the window would start before the first timepoint or
/// after the last one.
pub fn peak_deltas(
    deltas: ArrayView2<'_, f64>,
    marker_position: usize,
    lead: usize,
) -> Result<Array1<f64>> {
    let start = marker_position
        .checked_sub(lead)
        .ok_or(Error::InsufficientRows {
            requested: lead,
            available: marker_position,
        })?;
    if start >= deltas.nrows() {
        return Err(Error::InsufficientRows {
            requested: start + 1,
            available: deltas.nrows(),
        });
    }
    debug!("peak window starts at timepoint {start}");

    Ok(deltas
        .slice(s![start.., ..])
        .map_axis(Axis(0), |column| {
            column.fold(f64::NEG_INFINITY, |acc, &value| acc.max(value))
        }))
}
