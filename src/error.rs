use thiserror::Error;

/// Everything that can go wrong between reading a session and reporting a fit.
///
/// None of these are recovered from inside the pipeline: a session either produces a complete
/// analysis or one of the variants below.
#[derive(Debug, Error)]
pub enum Error {
    // Input shape
    #[error("column `{0}` is not present in the table header")]
    ColumnNotFound(String),
    #[error("marker `{token}` not found in column `{column}`")]
    MarkerNotFound { column: String, token: String },
    #[error("marker `{token}` appears on more than one row: {rows:?}")]
    AmbiguousMarker { token: String, rows: Vec<usize> },
    #[error("marker in column `{column}` is on the first row, there is no baseline row above it")]
    MissingBaseline { column: String },
    #[error("requested {requested} rows but only {available} are available")]
    InsufficientRows { requested: usize, available: usize },
    #[error("cell at row {row}, column `{column}` holds `{value}` where a number was expected")]
    InvalidCell {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row} has a value in column {column} past the {width} named in the header")]
    UnnamedCell {
        row: usize,
        column: usize,
        width: usize,
    },
    #[error("no complete rows remain after cleaning")]
    EmptySession,
    #[error("sessions do not share the same subjects and timepoints")]
    MismatchedSessions,
    #[error("paired series differ in length: {left} and {right}")]
    MismatchedLengths { left: usize, right: usize },
    #[error("low-pass cutoff {cutoff} Hz must lie strictly between 0 and half of {sample_rate} Hz")]
    InvalidFilter { cutoff: f64, sample_rate: f64 },
    #[error("subject index {index} is out of range for {available} subjects")]
    SubjectOutOfRange { index: usize, available: usize },

    // Arithmetic
    #[error("baseline of subject `{subject}` is {value}, it cannot be used as a divisor")]
    InvalidBaseline { subject: String, value: f64 },
    #[error("timepoint {timepoint} has {available} subjects, at least {required} are required")]
    InsufficientSubjects {
        timepoint: usize,
        available: usize,
        required: usize,
    },

    // Fit
    #[error("exponential fit for `{subject}` did not converge: {reason}")]
    FitDidNotConverge { subject: String, reason: String },
    #[error("exponential fit for `{subject}` produced a non-finite coefficient of determination")]
    NonFiniteGoodness { subject: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}
