//! Per-condition CSV report: one header row, one row per analysed frequency.

use std::io::Write;

use crate::error::ReportError;
use crate::estimator::{BootstrapResult, Measure, Phase};
use crate::naming::Condition;
use crate::params::AnalysisParams;

pub const HEADER: [&str; 13] = [
    "Subject Name",
    "Condition",
    "Number of Draws",
    "Trials per Draw",
    "Frequency",
    "PLV**2: bootstrapped mean",
    "PLV**2: bootstrapped variance",
    "Spectrum: bootstrapped mean",
    "Spectrum: bootstrapped variance",
    "Noise floor PLV**2: bootstrapped mean",
    "Noise floor PLV**2: bootstrapped variance",
    "Noise floor Spectrum: bootstrapped mean",
    "Noise floor Spectrum: bootstrapped variance",
];

/// Column order of the eight statistics after the frequency column.
const STAT_COLUMNS: [(Measure, Phase); 4] = [
    (Measure::Plv, Phase::Normal),
    (Measure::Spectrum, Phase::Normal),
    (Measure::Plv, Phase::FlipHalfTrials),
    (Measure::Spectrum, Phase::FlipHalfTrials),
];

/// Writes the header and all frequency rows; returns the number of data
/// rows written. Floats use shortest round-trip text (`70.0`, `1.2e-14`).
pub fn write_report<W: Write>(
    out: W,
    subject: &str,
    condition: Condition,
    params: &AnalysisParams,
    result: &BootstrapResult,
) -> Result<usize, ReportError> {
    result.check_complete()?;
    let columns = STAT_COLUMNS
        .iter()
        .map(|&(measure, phase)| result.stats(measure, phase))
        .collect::<Result<Vec<_>, _>>()?;

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(HEADER)?;

    let condition = condition.to_string();
    let n_draws = params.n_draws.to_string();
    let n_per_draw = params.n_per_draw.to_string();
    let mut float = ryu::Buffer::new();
    for (i, freq) in result.f.iter().enumerate() {
        let mut record = Vec::with_capacity(HEADER.len());
        record.push(subject.to_string());
        record.push(condition.clone());
        record.push(n_draws.clone());
        record.push(n_per_draw.clone());
        record.push(float.format(*freq).to_string());
        for stats in &columns {
            record.push(float.format(stats.boot_mean[i]).to_string());
            record.push(float.format(stats.boot_variance[i]).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(result.f.len())
}
