use std::fmt;
use std::ops::Range;
use std::path::Path;

use log::info;
use ndarray::{s, Array1};

use crate::agreement::{pearson, BlandAltman};
use crate::aggregate::{across_subjects, Summary};
use crate::config::Config;
use crate::delta::{peak_deltas, DeltaSeries};
use crate::export::{self, FitReport};
use crate::filter::filtered_peaks;
use crate::fit::{aligned, fit, FitConfig, FitResult, FitTarget};
use crate::session::{RawTable, Session};
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "study.toml";

/// The two devices recorded side by side in every session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Pcb,
    Sentec,
}

impl Device {
    /// Name of the session table for this device inside the working directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Pcb => "pcb.csv",
            Self::Sentec => "sentec.csv",
        }
    }

    /// Fit settings of this device, if it is fitted at all
    #[must_use]
    pub const fn fit_config(self, config: &Config) -> Option<&FitConfig> {
        match self {
            Self::Pcb => config.fit.pcb.as_ref(),
            Self::Sentec => config.fit.sentec.as_ref(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcb => write!(f, "PCB"),
            Self::Sentec => write!(f, "Sentec"),
        }
    }
}

/// Build a study from a working directory
///
/// The directory holds `study.toml` and one session table per device.
///
/// # Errors
/// Returns an error if any file is missing or malformed, if either device fails the pipeline,
/// or if the two devices do not cover the same subjects and timepoints.
pub fn build(working_directory: &Path) -> Result<Study> {
    let config = Config::from_file(&working_directory.join(CONFIG_FILE))?;
    info!("read configuration from {working_directory:?}");

    let pcb = Analysis::run(Device::Pcb, working_directory, &config)?;
    let sentec = Analysis::run(Device::Sentec, working_directory, &config)?;
    if !pcb.session.is_aligned_with(&sentec.session) {
        return Err(Error::MismatchedSessions);
    }

    let agreement = config
        .subjects
        .iter()
        .map(|&subject| {
            let name = pcb.session.subject_name(subject)?.to_owned();
            let result = BlandAltman::compute(
                pcb.deltas.normalized.column(subject),
                sentec.deltas.normalized.column(subject),
            )?;
            info!(
                "`{name}` agreement: bias {:.3}, limits [{:.3}, {:.3}]",
                result.mean_difference, result.lower_limit, result.upper_limit
            );
            Ok((name, result))
        })
        .collect::<Result<Vec<_>>>()?;

    let peak_correlation = pearson(pcb.peaks.view(), sentec.peaks.view())?;
    info!("peak correlation between devices: {peak_correlation:.3}");

    Ok(Study {
        config,
        pcb,
        sentec,
        agreement,
        peak_correlation,
    })
}

/// Both devices' analyses and how they compare
#[derive(Debug)]
pub struct Study {
    pub config: Config,
    pub pcb: Analysis,
    pub sentec: Analysis,
    /// Bland-Altman comparison of the normalized deltas of every configured subject
    pub agreement: Vec<(String, BlandAltman)>,
    /// Correlation of the per-subject peak deltas of the two devices
    pub peak_correlation: f64,
}

impl Study {
    /// Write the delta and normalized matrices of both devices and the fit report into `dir`
    ///
    /// # Errors
    /// Returns any file system or write error.
    pub fn export(&self, dir: &Path) -> Result<()> {
        for analysis in [&self.pcb, &self.sentec] {
            let subjects = analysis.session.subjects();
            export::write_matrix_to_path(
                &dir.join(format!("{}_df_delta.csv", analysis.device)),
                subjects,
                analysis.deltas.delta.view(),
            )?;
            export::write_matrix_to_path(
                &dir.join(format!("{}_df_normalized.csv", analysis.device)),
                subjects,
                analysis.deltas.normalized.view(),
            )?;
        }

        let reports = self
            .pcb
            .fit_reports()
            .chain(self.sentec.fit_reports())
            .collect::<Vec<_>>();
        export::write_fits(std::fs::File::create(dir.join("fits.csv"))?, &reports)?;
        info!("exported study to {dir:?}");
        Ok(())
    }
}

/// Exponential fit of one subject
#[derive(Clone, Debug)]
pub struct SubjectFit {
    pub subject: String,
    pub result: FitResult,
}

/// Everything computed from one device's session table
#[derive(Debug)]
pub struct Analysis {
    pub device: Device,
    pub session: Session,
    pub deltas: DeltaSeries,
    /// Statistics across subjects of the raw samples
    pub raw: Summary<f64>,
    /// Statistics across subjects of the deltas
    pub delta: Summary<f64>,
    /// Normalized deltas combined across subjects as configured
    pub normalized: Array1<f64>,
    /// Timepoints of the rebreathing phase
    pub rebreathing: Range<usize>,
    /// Statistics across subjects of the normalized deltas during the rebreathing phase
    pub rebreathing_normalized: Summary<f64>,
    /// Largest delta of every subject from the baseline row on
    pub peaks: Array1<f64>,
    /// Largest low-pass filtered raw sample of every subject after the marker
    pub filtered_peaks: Array1<f64>,
    pub fits: Vec<SubjectFit>,
}

impl Analysis {
    /// Run the full pipeline on `device`'s table in `working_directory`
    ///
    /// # Errors
    /// Propagates every error of the pipeline stages.
    pub fn run(device: Device, working_directory: &Path, config: &Config) -> Result<Self> {
        info!("analysing {device}");
        let raw = RawTable::from_path(&working_directory.join(device.file_name()))?;
        Self::from_raw(device, &raw, config)
    }

    /// Every session needs at least two subjects, the spread across subjects is part of the
    /// analysis.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientSubjects`] for a single-subject session and propagates every
    /// other error of the pipeline stages.
    pub fn from_raw(device: Device, raw: &RawTable, config: &Config) -> Result<Self> {
        let session = Session::from_raw(raw, &config.marker_column, &config.marker_token)?;
        let deltas = DeltaSeries::from_session(&session)?;
        let marker_position = session.marker_position();

        let raw_summary = Summary::compute(session.values().view())?;
        let delta_summary = Summary::compute(deltas.delta.view())?;
        let normalized = across_subjects(
            deltas.normalized.view(),
            config.normalized_aggregation.into(),
        )?;

        let rebreathing = rebreathing_window(
            marker_position,
            config.interval.rebreathing_timepoints(),
            session.num_timepoints(),
        )?;
        let rebreathing_normalized =
            Summary::compute(deltas.normalized.slice(s![rebreathing.clone(), ..]))?;

        let peaks = peak_deltas(deltas.delta.view(), marker_position, config.peak_window_lead)?;
        let filtered_peaks =
            filtered_peaks(session.values().view(), marker_position, &config.filter)?;

        let fits = match device.fit_config(config) {
            Some(fit_config) => config
                .subjects
                .iter()
                .map(|&subject| {
                    let name = session.subject_name(subject)?.to_owned();
                    let series = match fit_config.target {
                        FitTarget::Raw => session.series(subject)?,
                        FitTarget::Delta => deltas.delta.column(subject),
                    };
                    let series =
                        aligned(series.slice(s![marker_position..]), fit_config.lead_in);
                    let result = fit(series.view(), fit_config, &format!("{device} {name}"))?;
                    Ok(SubjectFit {
                        subject: name,
                        result,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => {
                if !config.subjects.is_empty() {
                    info!("no fit settings for {device}, skipping its fits");
                }
                vec![]
            }
        };

        Ok(Self {
            device,
            session,
            deltas,
            raw: raw_summary,
            delta: delta_summary,
            normalized,
            rebreathing,
            rebreathing_normalized,
            peaks,
            filtered_peaks,
            fits,
        })
    }

    fn fit_reports(&self) -> impl Iterator<Item = FitReport> + '_ {
        self.fits.iter().map(|fit| {
            let (amplitude_error, time_constant_error) = fit.result.standard_errors();
            FitReport {
                device: self.device.to_string(),
                subject: fit.subject.clone(),
                amplitude: fit.result.amplitude,
                amplitude_error,
                time_constant: fit.result.time_constant,
                time_constant_error,
                r_squared: fit.result.r_squared,
                window_start: fit.result.window.start,
                window_end: fit.result.window.end,
            }
        })
    }
}

/// Timepoints from the marker position spanning the rebreathing phase, cut at the end of the
/// session
fn rebreathing_window(
    marker_position: usize,
    length: usize,
    num_timepoints: usize,
) -> Result<Range<usize>> {
    let end = (marker_position + length).min(num_timepoints);
    if end <= marker_position {
        return Err(Error::InsufficientRows {
            requested: marker_position + 1,
            available: num_timepoints,
        });
    }
    Ok(marker_position..end)
}
