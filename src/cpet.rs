use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::session::Cell;
use crate::{Error, Result};

pub const START_TOKEN: &str = "START";
pub const END_TOKEN: &str = "END";

/// End-tidal CO2 per breath for every subject of a CPET
///
/// The export has no header. Each row is a subject: a label followed by one value per breath,
/// with `START` and `END` dropped in between the breaths that bound the rebreathing phase.
#[derive(Clone, Debug)]
pub struct CpetTable {
    rows: Vec<(String, Vec<Cell>)>,
}

/// One subject's breaths with the maneuver bounds expressed as breath indices
#[derive(Clone, Debug, PartialEq)]
pub struct BreathSeries {
    pub label: String,
    /// End-tidal CO2 partial pressure in mmHg, one value per breath
    pub etco2: Vec<f64>,
    /// Index of the first breath after `START`
    pub start: usize,
    /// Index of the first breath after `END`
    pub end: usize,
}

impl BreathSeries {
    /// Breaths recorded between the two tokens
    #[must_use]
    pub fn maneuver(&self) -> &[f64] {
        &self.etco2[self.start..self.end]
    }
}

impl CpetTable {
    /// # Errors
    /// Returns an error if the reader fails or the content is not valid CSV.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = vec![];
        for record in rdr.records() {
            let record = record?;
            let mut fields = record.iter();
            let label = fields.next().unwrap_or_default().trim().to_owned();
            rows.push((label, fields.map(Cell::parse).collect()));
        }
        debug!("read {} CPET subjects", rows.len());

        Ok(Self { rows })
    }

    /// # Errors
    /// Returns an error if the file cannot be read or is not valid CSV.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = fs::read(path)?;
        Self::from_reader(&file[..])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Breaths of the subject on row `index`, with missing cells and both tokens removed
    ///
    /// # Errors
    /// Returns [`Error::SubjectOutOfRange`] for an unknown row, [`Error::MarkerNotFound`] or
    /// [`Error::AmbiguousMarker`] unless each token appears exactly once with `END` after
    /// `START`, and [`Error::InvalidCell`] for any other non-numeric cell.
    pub fn subject(&self, index: usize) -> Result<BreathSeries> {
        let (label, cells) = self.rows.get(index).ok_or(Error::SubjectOutOfRange {
            index,
            available: self.rows.len(),
        })?;

        let mut etco2 = vec![];
        let mut start = vec![];
        let mut end = vec![];
        for (ii, cell) in cells.iter().enumerate() {
            match cell {
                Cell::Number(value) => etco2.push(*value),
                Cell::Marker(token) if token == START_TOKEN => start.push(etco2.len()),
                Cell::Marker(token) if token == END_TOKEN => end.push(etco2.len()),
                Cell::Marker(token) => {
                    return Err(Error::InvalidCell {
                        row: index,
                        column: (ii + 1).to_string(),
                        value: token.clone(),
                    })
                }
                Cell::Missing => {}
            }
        }

        let start = single(label, START_TOKEN, &start)?;
        let end = single(label, END_TOKEN, &end)?;
        if end < start {
            return Err(Error::MarkerNotFound {
                column: label.clone(),
                token: format!("{END_TOKEN} after {START_TOKEN}"),
            });
        }

        Ok(BreathSeries {
            label: label.clone(),
            etco2,
            start,
            end,
        })
    }
}

fn single(label: &str, token: &str, positions: &[usize]) -> Result<usize> {
    match positions {
        [position] => Ok(*position),
        [] => Err(Error::MarkerNotFound {
            column: label.to_owned(),
            token: token.to_owned(),
        }),
        _ => Err(Error::AmbiguousMarker {
            token: token.to_owned(),
            rows: positions.to_vec(),
        }),
    }
}
