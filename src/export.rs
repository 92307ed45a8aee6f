use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::debug;
use ndarray::ArrayView2;
use serde::Serialize;

use crate::resample::Resampled;
use crate::{Error, Result};

/// Decimal places kept in every exported value
pub const DECIMALS: usize = 2;

fn writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b';').from_writer(inner)
}

fn rounded(value: f64) -> String {
    format!("{value:.prec$}", prec = DECIMALS)
}

/// Write a timepoints x subjects matrix with one named column per subject
///
/// # Errors
/// Returns [`Error::MismatchedLengths`] if `subjects` does not name every column, or any write
/// error.
pub fn write_matrix<W: Write>(
    inner: W,
    subjects: &[String],
    matrix: ArrayView2<'_, f64>,
) -> Result<()> {
    if subjects.len() != matrix.ncols() {
        return Err(Error::MismatchedLengths {
            left: subjects.len(),
            right: matrix.ncols(),
        });
    }

    let mut wtr = writer(inner);
    wtr.write_record(subjects)?;
    for row in matrix.rows() {
        wtr.write_record(row.iter().map(|&value| rounded(value)))?;
    }
    wtr.flush()?;
    Ok(())
}

/// # Errors
/// See [`write_matrix`]. Also fails if `path` cannot be created.
pub fn write_matrix_to_path(
    path: &Path,
    subjects: &[String],
    matrix: ArrayView2<'_, f64>,
) -> Result<()> {
    debug!("writing {path:?}");
    write_matrix(File::create(path)?, subjects, matrix)
}

/// One line of the fit report
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FitReport {
    pub device: String,
    pub subject: String,
    pub amplitude: f64,
    pub amplitude_error: f64,
    pub time_constant: f64,
    pub time_constant_error: f64,
    pub r_squared: f64,
    pub window_start: usize,
    pub window_end: usize,
}

/// Write one row per fitted subject, with a header taken from the field names
///
/// # Errors
/// Returns any serialisation or write error.
pub fn write_fits<W: Write>(inner: W, reports: &[FitReport]) -> Result<()> {
    let mut wtr = writer(inner);
    for report in reports {
        wtr.serialize(report)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write resampled recordings side by side, aligned on their markers
///
/// Every column gets `token` in the first column on the shared marker row, with earlier
/// windows above it and later windows below. Columns with fewer windows on either side are
/// padded with empty cells, so the output reads back as a session table marked in the first
/// column.
///
/// # Errors
/// Returns [`Error::MismatchedLengths`] if `names` and `columns` differ in length, or any
/// write error.
pub fn write_aligned<W: Write>(
    inner: W,
    names: &[String],
    columns: &[Resampled],
    token: &str,
) -> Result<()> {
    if names.len() != columns.len() {
        return Err(Error::MismatchedLengths {
            left: names.len(),
            right: columns.len(),
        });
    }

    let before = columns.iter().map(|c| c.marker_position).max().unwrap_or(0);
    let after = columns
        .iter()
        .map(|c| c.values.len().saturating_sub(c.marker_position))
        .max()
        .unwrap_or(0);

    let cell = |column: &Resampled, row: usize| -> String {
        (row + column.marker_position)
            .checked_sub(before)
            .and_then(|index| column.values.get(index))
            .map_or_else(String::new, |&value| rounded(value))
    };

    let mut wtr = writer(inner);
    wtr.write_record(names)?;
    for row in 0..before {
        wtr.write_record(columns.iter().map(|column| cell(column, row)))?;
    }
    wtr.write_record(
        (0..columns.len()).map(|jj| if jj == 0 { token.to_owned() } else { String::new() }),
    )?;
    for row in before..before + after {
        wtr.write_record(columns.iter().map(|column| cell(column, row)))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;
    use tempdir::TempDir;

    use super::{write_aligned, write_fits, write_matrix, write_matrix_to_path, FitReport};
    use crate::resample::Resampled;
    use crate::session::{RawTable, Session};
    use crate::Error;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|&name| name.to_owned()).collect()
    }

    #[test]
    fn matrices_are_rounded_only_on_output() {
        let matrix = arr2(&[[0., 1.23456], [-2.005_01, 100.]]);
        let mut buffer = vec![];

        write_matrix(&mut buffer, &names(&["28_01L", "9_02L"]), matrix.view()).unwrap();

        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "28_01L;9_02L\n0.00;1.23\n-2.01;100.00\n"
        );
    }

    #[test]
    fn column_names_must_cover_the_matrix() {
        let matrix = arr2(&[[0., 1.]]);
        assert!(matches!(
            write_matrix(vec![], &names(&["only"]), matrix.view()),
            Err(Error::MismatchedLengths { left: 1, right: 2 })
        ));
    }

    #[test]
    fn matrices_are_written_to_disk() {
        let tmp_dir = TempDir::new("matrices_are_written_to_disk").unwrap();
        let path = tmp_dir.path().join("PCB_df_delta.csv");

        write_matrix_to_path(&path, &names(&["a"]), arr2(&[[1.], [2.]]).view()).unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\n1.00\n2.00\n");
    }

    #[test]
    fn fit_reports_carry_a_header() {
        let report = FitReport {
            device: "PCB".to_owned(),
            subject: "28_01L".to_owned(),
            amplitude: 300.,
            amplitude_error: 1.5,
            time_constant: 6.,
            time_constant_error: 0.25,
            r_squared: 0.99,
            window_start: 19,
            window_end: 88,
        };
        let mut buffer = vec![];

        write_fits(&mut buffer, &[report]).unwrap();

        let written = String::from_utf8(buffer).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            "device;subject;amplitude;amplitude_error;time_constant;time_constant_error;\
             r_squared;window_start;window_end"
        );
        assert_eq!(lines.next().unwrap(), "PCB;28_01L;300.0;1.5;6.0;0.25;0.99;19;88");
    }

    #[test]
    fn aligned_recordings_reload_as_a_session() {
        let columns = vec![
            Resampled {
                values: vec![40., 41., 45., 48.],
                marker_position: 2,
            },
            Resampled {
                values: vec![30., 35., 37., 39.],
                marker_position: 1,
            },
        ];
        let mut buffer = vec![];

        write_aligned(&mut buffer, &names(&["s01", "s02"]), &columns, "START").unwrap();

        let written = String::from_utf8(buffer).unwrap();
        assert_eq!(
            written,
            "s01;s02\n40.00;\n41.00;30.00\nSTART;\n45.00;35.00\n48.00;37.00\n;39.00\n"
        );

        let raw = RawTable::from_reader(written.as_bytes()).unwrap();
        let session = Session::from_raw(&raw, "s01", "START").unwrap();
        assert_eq!(session.baseline().to_vec(), vec![41., 30.]);
        assert_eq!(session.marker_position(), 1);
        assert_eq!(session.offset(), 1);
        assert_eq!(session.num_timepoints(), 3);
    }
}
