use log::debug;
use ndarray::ArrayView1;

use crate::aggregate::median;
use crate::session::{Cell, RawTable};
use crate::{Error, Result};

/// How the raw samples of one window are reduced to a timepoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Median,
}

impl Reducer {
    fn reduce(self, window: &[f64]) -> Option<f64> {
        let window = ArrayView1::from(window);
        match self {
            Self::Mean => window.mean(),
            Self::Median => median(window),
        }
    }
}

/// A raw recording reduced to one value per window, split at the marker
#[derive(Clone, Debug, PartialEq)]
pub struct Resampled {
    pub values: Vec<f64>,
    /// Index of the first window after the marker
    pub marker_position: usize,
}

/// Reduce a one-sample-per-second recording to windows of `window` samples
///
/// Windows before the marker are counted backward from the marker row, which closes the last
/// pre-marker window, so that every window boundary lines up with the start of the maneuver.
/// Windows after the marker start on the row following it. Incomplete windows at either end
/// are dropped.
///
/// The first row of the recording counts towards the earliest window. Earlier analyses never
/// read it, so when `marker + 1` is a multiple of `window` this yields one more leading window
/// than they did.
///
/// # Errors
/// Returns [`Error::InsufficientRows`] if `window` is zero or `marker` is past the end of
/// `values`.
pub fn resample(
    values: &[f64],
    marker: usize,
    window: usize,
    reducer: Reducer,
) -> Result<Resampled> {
    if window == 0 {
        return Err(Error::InsufficientRows {
            requested: 1,
            available: 0,
        });
    }
    if marker >= values.len() {
        return Err(Error::InsufficientRows {
            requested: marker + 1,
            available: values.len(),
        });
    }

    let before = values[..=marker].iter().rev().copied().collect::<Vec<_>>();
    let mut resampled = before
        .chunks_exact(window)
        .filter_map(|chunk| reducer.reduce(chunk))
        .collect::<Vec<_>>();
    resampled.reverse();
    let marker_position = resampled.len();

    resampled.extend(
        values[marker + 1..]
            .chunks_exact(window)
            .filter_map(|chunk| reducer.reduce(chunk)),
    );
    debug!(
        "resampled {} samples into {} windows of {window}",
        values.len(),
        resampled.len()
    );

    Ok(Resampled {
        values: resampled,
        marker_position,
    })
}

/// One device channel of a raw recording with its marker row
#[derive(Clone, Debug)]
pub struct Recording {
    pub values: Vec<f64>,
    pub marker: usize,
}

impl Recording {
    /// Pull `value_column` out of a raw recording whose `mark_column` holds `token` on the row
    /// where the maneuver starts
    ///
    /// # Errors
    /// Propagates marker lookup errors and returns [`Error::InvalidCell`] for any cell of
    /// `value_column` that is not a number.
    pub fn from_raw(
        raw: &RawTable,
        mark_column: &str,
        token: &str,
        value_column: &str,
    ) -> Result<Self> {
        let marker = raw.locate_marker(mark_column, token)?;
        let index = raw.column_index(value_column)?;

        let values = raw
            .rows()
            .iter()
            .enumerate()
            .map(|(row, cells)| match &cells[index] {
                Cell::Number(value) => Ok(*value),
                other => Err(Error::InvalidCell {
                    row,
                    column: value_column.to_owned(),
                    value: other.to_string(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            values,
            marker: marker.row,
        })
    }

    /// # Errors
    /// See [`resample`].
    pub fn resample(&self, window: usize, reducer: Reducer) -> Result<Resampled> {
        resample(&self.values, self.marker, window, reducer)
    }
}
