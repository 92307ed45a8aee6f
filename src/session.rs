use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use itertools::Itertools;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1};

use crate::baseline;
use crate::{Error, Result};

/// A single cell of a device export
///
/// Device tables are numeric apart from the marker token dropped into one column on the row
/// where the maneuver starts, and the empty cells left where a subject has no sample.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Number(f64),
    Marker(String),
    Missing,
}

impl Cell {
    pub(crate) fn parse(field: &str) -> Self {
        let field = field.trim();
        if field.is_empty() || field.eq_ignore_ascii_case("nan") {
            return Self::Missing;
        }
        field
            .parse::<f64>()
            .map_or_else(|_| Self::Marker(field.to_owned()), Self::Number)
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Marker(token) => write!(f, "{token}"),
            Self::Missing => write!(f, ""),
        }
    }
}

/// Location of the marker row in a raw table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    pub column: String,
    pub row: usize,
}

/// A device export exactly as read from disk: a header and rows of cells
#[derive(Clone, Debug)]
pub struct RawTable {
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl RawTable {
    /// Build a table from a header and rows. Rows shorter than the header are padded with
    /// missing cells, and empty cells trailing past the header are dropped.
    ///
    /// # Errors
    /// Returns [`Error::UnnamedCell`] if a row holds a value past the last named column.
    pub fn new(header: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let width = header.len();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(ii, mut row)| {
                if let Some(jj) = row
                    .iter()
                    .skip(width)
                    .position(|cell| *cell != Cell::Missing)
                {
                    return Err(Error::UnnamedCell {
                        row: ii,
                        column: width + jj,
                        width,
                    });
                }
                row.resize(width, Cell::Missing);
                Ok(row)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { header, rows })
    }

    /// Read a semicolon delimited export with a header row
    ///
    /// # Errors
    /// Returns an error if the reader fails, the content is not valid CSV or a row is wider
    /// than the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = rdr
            .headers()?
            .iter()
            .map(|name| name.trim().to_owned())
            .collect::<Vec<_>>();

        let mut rows = vec![];
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(Cell::parse).collect());
        }

        Self::new(header, rows)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or is not valid CSV.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("reading session table {path:?}");
        let file = fs::read(path)?;
        Self::from_reader(&file[..])
    }

    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// # Errors
    /// Returns [`Error::ColumnNotFound`] if no header entry matches `name`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_owned()))
    }

    /// Find the single row of `column` holding `token`
    ///
    /// # Errors
    /// Returns [`Error::MarkerNotFound`] if no row matches and [`Error::AmbiguousMarker`] if
    /// more than one does.
    pub fn locate_marker(&self, column: &str, token: &str) -> Result<Marker> {
        let index = self.column_index(column)?;
        let rows = self
            .rows
            .iter()
            .positions(|row| matches!(&row[index], Cell::Marker(found) if found == token))
            .collect::<Vec<_>>();

        match rows.as_slice() {
            [] => Err(Error::MarkerNotFound {
                column: column.to_owned(),
                token: token.to_owned(),
            }),
            [row] => Ok(Marker {
                column: column.to_owned(),
                row: *row,
            }),
            _ => Err(Error::AmbiguousMarker {
                token: token.to_owned(),
                rows,
            }),
        }
    }
}

/// A cleaned session: every subject column as floating point, aligned on timepoints
///
/// Rows are timepoints and columns are subjects. The marker row and every incomplete row have
/// been removed, so row indices no longer match those of the file. `offset` counts the rows
/// dropped above the marker, which is the shift between the two indexings.
#[derive(Clone, Debug)]
pub struct Session {
    subjects: Vec<String>,
    values: Array2<f64>,
    baseline: Array1<f64>,
    marker_position: usize,
    offset: usize,
}

impl Session {
    /// Clean `raw` around the marker `token` found in `marker_column`
    ///
    /// The baseline is captured from the raw table before any row is removed.
    ///
    /// # Errors
    /// Propagates marker lookup and baseline errors. Returns [`Error::InvalidCell`] if a
    /// non-numeric token appears outside the marker row and [`Error::EmptySession`] if no
    /// complete row remains.
    pub fn from_raw(raw: &RawTable, marker_column: &str, token: &str) -> Result<Self> {
        let marker = raw.locate_marker(marker_column, token)?;
        let baseline = baseline::extract(raw, &marker)?;

        let mut kept = vec![];
        let mut marker_position = 0;
        for (ii, row) in raw.rows().iter().enumerate() {
            if ii == marker.row {
                continue;
            }
            if let Some((jj, cell)) = row
                .iter()
                .find_position(|cell| matches!(cell, Cell::Marker(_)))
            {
                return Err(Error::InvalidCell {
                    row: ii,
                    column: raw.header()[jj].clone(),
                    value: cell.to_string(),
                });
            }
            let Some(values) = row.iter().map(Cell::as_number).collect::<Option<Vec<_>>>() else {
                continue;
            };
            if ii < marker.row {
                marker_position += 1;
            }
            kept.push(values);
        }

        if kept.is_empty() {
            return Err(Error::EmptySession);
        }

        let offset = marker.row - marker_position;
        info!(
            "session cleaned: {} timepoints, {} subjects, marker at {}, offset {offset}",
            kept.len(),
            raw.header().len(),
            marker_position
        );

        let values = Array2::from_shape_fn((kept.len(), raw.header().len()), |(ii, jj)| {
            kept[ii][jj]
        });

        Ok(Self {
            subjects: raw.header().to_vec(),
            values,
            baseline,
            marker_position,
            offset,
        })
    }

    #[must_use]
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Timepoints x subjects
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    #[must_use]
    pub const fn baseline(&self) -> &Array1<f64> {
        &self.baseline
    }

    /// Index of the first post-marker timepoint. The baseline row sits directly above it.
    #[must_use]
    pub const fn marker_position(&self) -> usize {
        self.marker_position
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn num_timepoints(&self) -> usize {
        self.values.nrows()
    }

    /// # Errors
    /// Returns [`Error::SubjectOutOfRange`] if `subject` is not a column of the session.
    pub fn series(&self, subject: usize) -> Result<ArrayView1<'_, f64>> {
        self.check_subject(subject)?;
        Ok(self.values.column(subject))
    }

    /// # Errors
    /// Returns [`Error::SubjectOutOfRange`] if `subject` is not a column of the session.
    pub fn subject_name(&self, subject: usize) -> Result<&str> {
        self.check_subject(subject)?;
        Ok(&self.subjects[subject])
    }

    fn check_subject(&self, subject: usize) -> Result<()> {
        if subject < self.subjects.len() {
            Ok(())
        } else {
            Err(Error::SubjectOutOfRange {
                index: subject,
                available: self.subjects.len(),
            })
        }
    }

    /// Whether `other` covers the same subjects over the same number of timepoints
    #[must_use]
    pub fn is_aligned_with(&self, other: &Self) -> bool {
        self.subjects == other.subjects && self.values.dim() == other.values.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::{Cell, RawTable, Session};
    use crate::Error;

    const TABLE: &str = "\
28_01L;9_02L;15_02L
;;
1480;30.1;41
1490;30.4;40.5
START;;
1500;31.2;42
;31.9;42.5
1560;32.4;44
";

    #[test]
    fn cells_are_classified() {
        assert_eq!(Cell::parse(" 12.5 "), Cell::Number(12.5));
        assert_eq!(Cell::parse(""), Cell::Missing);
        assert_eq!(Cell::parse("NaN"), Cell::Missing);
        assert_eq!(Cell::parse("START"), Cell::Marker("START".to_owned()));
    }

    #[test]
    fn marker_is_located_on_its_row() {
        let raw = RawTable::from_reader(TABLE.as_bytes()).unwrap();
        let marker = raw.locate_marker("28_01L", "START").unwrap();
        assert_eq!(marker.row, 3);
        assert_eq!(marker.column, "28_01L");
    }

    #[test]
    fn missing_marker_is_reported() {
        let raw = RawTable::from_reader(TABLE.as_bytes()).unwrap();
        assert!(matches!(
            raw.locate_marker("28_01L", "R1"),
            Err(Error::MarkerNotFound { .. })
        ));
        assert!(matches!(
            raw.locate_marker("unknown", "START"),
            Err(Error::ColumnNotFound(_))
        ));
    }

    #[test]
    fn repeated_marker_is_rejected() {
        let raw = RawTable::from_reader("a\n1\nSTART\n2\nSTART\n3\n".as_bytes()).unwrap();
        match raw.locate_marker("a", "START") {
            Err(Error::AmbiguousMarker { rows, .. }) => assert_eq!(rows, vec![1, 3]),
            other => panic!("expected an ambiguous marker, got {other:?}"),
        }
    }

    #[test]
    fn values_past_the_header_are_rejected() {
        assert!(matches!(
            RawTable::from_reader("a;b\n1;2\nSTART;\n3;4;5\n".as_bytes()),
            Err(Error::UnnamedCell {
                row: 2,
                column: 2,
                width: 2
            })
        ));
    }

    #[test]
    fn trailing_delimiters_are_accepted() {
        let raw = RawTable::from_reader("a;b\n1;2;\nSTART;;;\n3;4;\n".as_bytes()).unwrap();
        assert!(raw.rows().iter().all(|row| row.len() == 2));

        let session = Session::from_raw(&raw, "a", "START").unwrap();
        assert_eq!(session.series(1).unwrap().to_vec(), vec![2., 4.]);
    }

    #[test]
    fn cleaning_drops_marker_and_incomplete_rows() {
        let raw = RawTable::from_reader(TABLE.as_bytes()).unwrap();
        let session = Session::from_raw(&raw, "28_01L", "START").unwrap();

        assert_eq!(session.num_timepoints(), 4);
        assert_eq!(session.subjects().len(), 3);
        // One leading empty row dropped above the marker
        assert_eq!(session.offset(), 1);
        assert_eq!(session.marker_position(), 2);
        assert_eq!(session.series(0).unwrap().to_vec(), vec![1480., 1490., 1500., 1560.]);
        assert_eq!(session.baseline().to_vec(), vec![1490., 30.4, 40.5]);
    }

    #[test]
    fn stray_tokens_outside_the_marker_row_are_rejected() {
        let raw = RawTable::from_reader("a;b\n1;2\nSTART;\n3;R2\n".as_bytes()).unwrap();
        assert!(matches!(
            Session::from_raw(&raw, "a", "START"),
            Err(Error::InvalidCell { row: 2, .. })
        ));
    }

    #[test]
    fn subject_lookup_is_bounds_checked() {
        let raw = RawTable::from_reader(TABLE.as_bytes()).unwrap();
        let session = Session::from_raw(&raw, "28_01L", "START").unwrap();
        assert_eq!(session.subject_name(1).unwrap(), "9_02L");
        assert!(matches!(
            session.series(3),
            Err(Error::SubjectOutOfRange {
                index: 3,
                available: 3
            })
        ));
    }
}
