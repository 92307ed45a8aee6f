use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregation;
use crate::filter::FilterConfig;
use crate::fit::FitConfig;
use crate::Result;

/// Run configuration for one study, read from `study.toml`
///
/// Every session specific constant lives here rather than in the pipeline code. A minimal file
/// only needs the marker column. Each device is fitted only if it has its own fit section, since
/// the delay and the level the response rises from depend on the device's scale:
///
/// ```toml
/// marker_column = "28_01L"
///
/// [fit.pcb]
/// delay = 19
/// gap = -25.0
/// end_index = 88
/// initial_amplitude = 300.0
/// initial_time_constant = 2.0
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Column of the session table holding the marker token
    pub marker_column: String,
    #[serde(default = "default_marker_token")]
    pub marker_token: String,
    #[serde(default)]
    pub interval: Interval,
    /// Number of samples before the marker position included in the peak window
    #[serde(default = "default_peak_window_lead")]
    pub peak_window_lead: usize,
    #[serde(default)]
    pub normalized_aggregation: Aggregation,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub fit: DeviceFits,
    /// Indices of the subjects (columns) to run the exponential fit on
    #[serde(default)]
    pub subjects: Vec<usize>,
}

/// Exponential fit settings for each device. A device without settings is not fitted.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DeviceFits {
    pub pcb: Option<FitConfig>,
    pub sentec: Option<FitConfig>,
}

fn default_marker_token() -> String {
    "START".to_owned()
}

const fn default_peak_window_lead() -> usize {
    1
}

impl Config {
    /// Read a configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not deserialise into a `Config`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// # Errors
    /// Returns an error if `contents` does not deserialise into a `Config`.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Interval over which raw device samples were reduced into a single timepoint
///
/// The two recording protocols differ in how many raw samples make up a timepoint and
/// therefore in how many timepoints the rebreathing phase spans.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    TenSeconds,
    #[default]
    ThirtySeconds,
}

impl Interval {
    /// Raw one-second samples reduced into each timepoint
    #[must_use]
    pub const fn samples_per_timepoint(self) -> usize {
        match self {
            Self::TenSeconds => 10,
            Self::ThirtySeconds => 30,
        }
    }

    /// Length of the two minute rebreathing phase in timepoints
    #[must_use]
    pub const fn rebreathing_timepoints(self) -> usize {
        match self {
            Self::TenSeconds => 12,
            Self::ThirtySeconds => 4,
        }
    }
}
