//! Subject × condition batch loop.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{info, warn};

use crate::error::{DriverError, ParamsError, SkipReason};
use crate::estimator::{BootstrapResult, Estimator};
use crate::mat::MatFile;
use crate::naming::{input_file_name, output_file_name, resolve_output_path, Condition, Polarity};
use crate::params::AnalysisParams;
use crate::report::write_report;
use crate::trials::{draw_trial_subset, TrialMatrix};

/// MAT variable holding the `[channels, trials, samples]` epochs.
pub const DATA_KEY: &str = "data";
/// MAT variable holding the recording's sampling rate.
pub const SAMPLE_RATE_KEY: &str = "sampleRate";

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub save_dir: PathBuf,
    pub params: AnalysisParams,
}

impl RunConfig {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        save_dir: impl Into<PathBuf>,
        params: AnalysisParams,
    ) -> Result<Self, ParamsError> {
        params.validate()?;
        Ok(RunConfig {
            data_dir: data_dir.into(),
            save_dir: save_dir.into(),
            params,
        })
    }

    /// Trials drawn per polarity; a file must hold strictly more.
    pub fn min_trials(&self) -> usize {
        self.params.n_per_draw
    }
}

#[derive(Debug)]
pub enum ConditionOutcome {
    Written { output: PathBuf, rows: usize },
    /// The output file exists but is empty.
    Skipped { output: PathBuf, reason: SkipReason },
}

#[derive(Debug)]
pub struct ConditionReport {
    pub subject: String,
    pub condition: Condition,
    pub outcome: ConditionOutcome,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<ConditionReport>,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, ConditionOutcome::Written { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.reports.len() - self.written()
    }
}

pub struct Driver<E, R> {
    config: RunConfig,
    estimator: E,
    rng: R,
}

impl<E: Estimator, R: Rng> Driver<E, R> {
    pub fn new(config: RunConfig, estimator: E, rng: R) -> Self {
        Driver {
            config,
            estimator,
            rng,
        }
    }

    /// Processes every subject's three conditions in order. Skips are
    /// recorded in the summary; any other error stops the run.
    pub fn run<S: AsRef<str>>(&mut self, subjects: &[S]) -> Result<RunSummary, DriverError> {
        fs::create_dir_all(&self.config.save_dir).map_err(|source| DriverError::Output {
            path: self.config.save_dir.clone(),
            source,
        })?;

        let mut summary = RunSummary::default();
        for subject in subjects {
            let subject = subject.as_ref();
            for condition in Condition::ALL {
                let outcome = self.process_condition(subject, condition)?;
                summary.reports.push(ConditionReport {
                    subject: subject.to_string(),
                    condition,
                    outcome,
                });
            }
        }
        info!(
            written = summary.written(),
            skipped = summary.skipped(),
            "batch finished"
        );
        Ok(summary)
    }

    pub fn process_condition(
        &mut self,
        subject: &str,
        condition: Condition,
    ) -> Result<ConditionOutcome, DriverError> {
        info!(subject, "condition: {}", condition);

        let output = resolve_output_path(&self.config.save_dir, &output_file_name(subject, condition));
        let file = File::create(&output).map_err(|source| DriverError::Output {
            path: output.clone(),
            source,
        })?;

        match self.analyse(subject, condition) {
            Ok(result) => {
                let rows = write_report(
                    BufWriter::new(file),
                    subject,
                    condition,
                    &self.config.params,
                    &result,
                )?;
                info!(output = %output.display(), rows, "wrote bootstrap summary");
                Ok(ConditionOutcome::Written { output, rows })
            }
            Err(DriverError::Skip(reason)) => {
                warn!("{}", reason);
                Ok(ConditionOutcome::Skipped { output, reason })
            }
            Err(e) => Err(e),
        }
    }

    fn analyse(&mut self, subject: &str, condition: Condition) -> Result<BootstrapResult, DriverError> {
        let mut combined = Vec::with_capacity(Polarity::BOTH.len());
        for polarity in Polarity::BOTH {
            let trials = self.load_subsample(subject, condition, polarity)?;
            combined.push(trials);
        }
        Ok(self.estimator.estimate(&self.config.params, &combined)?)
    }

    fn load_subsample(
        &mut self,
        subject: &str,
        condition: Condition,
        polarity: Polarity,
    ) -> Result<TrialMatrix, DriverError> {
        let file = input_file_name(subject, condition, polarity);
        let (trials, recorded_rate) = load_trials(&self.config.data_dir.join(&file))
            .map_err(|e| match e {
                DriverError::Mat(ref m) if m.is_not_found() => SkipReason::MissingInput {
                    file: file.clone(),
                    condition,
                }
                .into(),
                other => other,
            })?;

        let min_trials = self.config.min_trials();
        if trials.n_trials() <= min_trials {
            return Err(SkipReason::InsufficientTrials {
                trials: trials.n_trials(),
                file,
                condition,
            }
            .into());
        }
        let configured = self.config.params.sample_rate;
        if recorded_rate != configured {
            return Err(SkipReason::SampleRateMismatch {
                recorded: recorded_rate,
                configured,
                file,
                condition,
            }
            .into());
        }

        let use_trials = draw_trial_subset(trials.n_trials(), min_trials, &mut self.rng);
        info!("using {} polarity trials:\n {:?}", polarity, use_trials);
        Ok(trials.select_trials(&use_trials))
    }
}

/// Reads the trial matrix and its recorded sampling rate from one file.
pub fn load_trials(path: &Path) -> Result<(TrialMatrix, f64), DriverError> {
    let mat = MatFile::open(path)?;
    let data = mat.array3(DATA_KEY)?;
    let sample_rate = mat.scalar(SAMPLE_RATE_KEY)?;
    Ok((TrialMatrix::new(data), sample_rate))
}
