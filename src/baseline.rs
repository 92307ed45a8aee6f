use ndarray::Array1;

use crate::session::{Cell, Marker, RawTable};
use crate::{Error, Result};

/// Capture every subject's baseline: the sample on the row directly above the marker
///
/// # Errors
/// Returns [`Error::MissingBaseline`] if the marker is on the first row and
/// [`Error::InvalidCell`] if any cell of the baseline row is not a number.
pub fn extract(raw: &RawTable, marker: &Marker) -> Result<Array1<f64>> {
    let Some(row) = marker.row.checked_sub(1) else {
        return Err(Error::MissingBaseline {
            column: marker.column.clone(),
        });
    };

    raw.rows()[row]
        .iter()
        .zip(raw.header())
        .map(|(cell, column)| match cell {
            Cell::Number(value) => Ok(*value),
            other => Err(Error::InvalidCell {
                row,
                column: column.clone(),
                value: other.to_string(),
            }),
        })
        .collect()
}
