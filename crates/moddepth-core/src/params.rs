use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParamsError;

/// Noise floor obtained by inverting the phase of half the trials.
pub const PHASE_FLIP_HALF_TRIALS: &str = "phaseFlipHalfTrials";

/// Parameter set handed to the estimator. Key names match what the
/// estimator expects on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Sampling rate in Hz; input files must record the same value.
    #[serde(rename = "Fs")]
    pub sample_rate: f64,
    pub nfft: usize,
    /// Passband reported by the estimator, `[low, high]` in Hz.
    pub fpass: [f64; 2],
    /// `[time-bandwidth product, taper count]`.
    pub tapers: [u32; 2],
    #[serde(rename = "noiseFloorType")]
    pub noise_floor_type: Vec<String>,
    #[serde(rename = "nDraws")]
    pub n_draws: usize,
    #[serde(rename = "nPerDraw")]
    pub n_per_draw: usize,
    pub threads: usize,
    #[serde(rename = "returnIndividualBootstrapResults")]
    pub return_individual_bootstrap_results: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        AnalysisParams {
            sample_rate: 5000.0,
            nfft: 2048,
            fpass: [70.0, 1000.0],
            tapers: [2, 3],
            noise_floor_type: vec![PHASE_FLIP_HALF_TRIALS.to_string()],
            n_draws: 100,
            n_per_draw: 0,
            threads: 6,
            return_individual_bootstrap_results: false,
        }
    }
}

impl AnalysisParams {
    /// Defaults with `nPerDraw` set to the subsample size.
    pub fn new(min_trials: usize) -> Self {
        AnalysisParams {
            n_per_draw: min_trials,
            ..AnalysisParams::default()
        }
    }

    /// Reads overrides from a JSON object; missing keys keep their defaults.
    /// `nPerDraw` is always replaced by `min_trials`.
    pub fn from_json_file(path: &Path, min_trials: usize) -> Result<Self, ParamsError> {
        let raw = fs::read_to_string(path).map_err(|source| ParamsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut params: AnalysisParams = serde_json::from_str(&raw)?;
        params.n_per_draw = min_trials;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        fn invalid(field: &'static str, reason: String) -> Result<(), ParamsError> {
            Err(ParamsError::Invalid { field, reason })
        }

        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return invalid("Fs", format!("{} is not a positive rate", self.sample_rate));
        }
        if self.nfft == 0 {
            return invalid("nfft", "must be greater than zero".into());
        }
        let [low, high] = self.fpass;
        if !(low >= 0.0 && low < high) {
            return invalid("fpass", format!("[{}, {}] is not an increasing band", low, high));
        }
        let nyquist = self.sample_rate / 2.0;
        if high > nyquist {
            return invalid("fpass", format!("upper edge {} Hz exceeds Nyquist {} Hz", high, nyquist));
        }
        let [tw, k] = self.tapers;
        if k == 0 || k > (2 * tw).saturating_sub(1) {
            return invalid("tapers", format!("{} tapers is outside 1..=2*TW-1 for TW={}", k, tw));
        }
        if self.noise_floor_type.is_empty() {
            return invalid("noiseFloorType", "at least one noise floor method is required".into());
        }
        if self.n_draws == 0 {
            return invalid("nDraws", "must be greater than zero".into());
        }
        if self.n_per_draw == 0 {
            return invalid("nPerDraw", "must be greater than zero".into());
        }
        if self.threads == 0 {
            return invalid("threads", "must be greater than zero".into());
        }
        Ok(())
    }

    pub fn flips_half_trials(&self) -> bool {
        self.noise_floor_type.iter().any(|t| t == PHASE_FLIP_HALF_TRIALS)
    }
}
