//! Contract with the external multi-taper / bootstrap estimator.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EstimatorError;
use crate::params::AnalysisParams;
use crate::trials::{EncodedMatrix, TrialMatrix};

/// Estimation routine the bootstrap wraps.
pub const MTCPCA_COMPLETE: &str = "mtcpca_complete";

/// Spectral quantity summarised by the bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measure {
    /// Squared phase-locking value.
    Plv,
    /// Spectrum magnitude.
    Spectrum,
}

/// Phase treatment of the trials before recombination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Normal,
    /// Noise floor: half the trials phase-inverted.
    FlipHalfTrials,
}

/// Result key, e.g. `mtcpcaPLV_normalPhase`.
pub fn variant_key(measure: Measure, phase: Phase) -> String {
    let measure = match measure {
        Measure::Plv => "PLV",
        Measure::Spectrum => "Spectrum",
    };
    let phase = match phase {
        Phase::Normal => "normalPhase",
        Phase::FlipHalfTrials => "phaseFlipHalfTrials",
    };
    format!("mtcpca{}_{}", measure, phase)
}

/// Bootstrapped summary of one variant, one value per frequency.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BootStats {
    #[serde(rename = "bootMean")]
    pub boot_mean: Vec<f64>,
    #[serde(rename = "bootVariance")]
    pub boot_variance: Vec<f64>,
}

/// What the estimator hands back for one subject/condition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Analysed frequency axis in Hz.
    pub f: Vec<f64>,
    /// Parameters as the estimator saw them, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(rename = "results")]
    pub variants: BTreeMap<String, BootStats>,
}

impl BootstrapResult {
    pub fn stats(&self, measure: Measure, phase: Phase) -> Result<&BootStats, EstimatorError> {
        let key = variant_key(measure, phase);
        self.variants
            .get(&key)
            .ok_or(EstimatorError::MissingVariant(key))
    }

    /// Every variant the report reads must exist and match the length of `f`.
    pub fn check_complete(&self) -> Result<(), EstimatorError> {
        for measure in [Measure::Plv, Measure::Spectrum] {
            for phase in [Phase::Normal, Phase::FlipHalfTrials] {
                let stats = self.stats(measure, phase)?;
                for got in [stats.boot_mean.len(), stats.boot_variance.len()] {
                    if got != self.f.len() {
                        return Err(EstimatorError::LengthMismatch {
                            variant: variant_key(measure, phase),
                            got,
                            expected: self.f.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Spectral/bootstrap estimation over an ordered collection of trial
/// matrices (positive polarity first). Blocks until the result is ready.
pub trait Estimator {
    fn estimate(
        &self,
        params: &AnalysisParams,
        data: &[TrialMatrix],
    ) -> Result<BootstrapResult, EstimatorError>;
}

impl<E: Estimator + ?Sized> Estimator for &E {
    fn estimate(
        &self,
        params: &AnalysisParams,
        data: &[TrialMatrix],
    ) -> Result<BootstrapResult, EstimatorError> {
        (**self).estimate(params, data)
    }
}

/// JSON request written to the estimator's stdin.
#[derive(Debug, Serialize)]
pub struct EstimatorRequest<'a> {
    pub method: &'static str,
    pub params: &'a AnalysisParams,
    pub data: Vec<EncodedMatrix>,
}

/// Runs an external program per estimation: request JSON on stdin, result
/// JSON on stdout, diagnostics on stderr.
#[derive(Clone, Debug)]
pub struct CommandEstimator {
    program: String,
    args: Vec<String>,
}

impl CommandEstimator {
    pub fn new(program: impl Into<String>) -> Self {
        CommandEstimator {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl Estimator for CommandEstimator {
    fn estimate(
        &self,
        params: &AnalysisParams,
        data: &[TrialMatrix],
    ) -> Result<BootstrapResult, EstimatorError> {
        if data.is_empty() {
            return Err(EstimatorError::NoData);
        }
        let request = serde_json::to_vec(&EstimatorRequest {
            method: MTCPCA_COMPLETE,
            params,
            data: data.iter().map(EncodedMatrix::from).collect(),
        })?;

        info!(estimator = %self, draws = params.n_draws, per_draw = params.n_per_draw, "running bootstrap");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EstimatorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin from a helper thread so a chatty estimator cannot fill
        // its stdout pipe while we are still writing.
        let mut stdin = child.stdin.take().ok_or_else(|| {
            EstimatorError::Pipe(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "estimator stdin unavailable",
            ))
        })?;
        let feeder = thread::spawn(move || stdin.write_all(&request));

        let output = child.wait_with_output()?;
        let fed = feeder.join().unwrap_or_else(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "estimator stdin writer panicked",
            ))
        });

        if !output.status.success() {
            return Err(EstimatorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // A clean exit that stopped reading early is fine; anything else is not.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(EstimatorError::Pipe(e));
            }
        }

        let result: BootstrapResult = serde_json::from_slice(&output.stdout)?;
        result.check_complete()?;
        debug!(frequencies = result.f.len(), "bootstrap result received");
        Ok(result)
    }
}
