use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::naming::Condition;

/// Errors raised while decoding a level-5 MAT file.
#[derive(Debug, Error)]
pub enum MatError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a level-5 MAT file: {0}")]
    BadHeader(String),
    #[error("MAT v7.3 (HDF5) files are not supported")]
    Hdf5Unsupported,
    #[error("truncated data element at byte {offset}")]
    Truncated { offset: usize },
    #[error("unsupported data type {0} in numeric array")]
    UnsupportedDataType(u32),
    #[error("decompression failed: {0}")]
    Decompress(io::Error),
    #[error("malformed matrix element: {0}")]
    Malformed(String),
    #[error("variable not found: {0}")]
    MissingVariable(String),
    #[error("variable {name} has shape {dims:?}, expected {expected}")]
    Shape {
        name: String,
        dims: Vec<usize>,
        expected: &'static str,
    },
}

impl MatError {
    /// True when the underlying cause is a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MatError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Invalid analysis parameters.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("cannot read parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid parameter JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameter {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of the external spectral/bootstrap estimator.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("failed to launch estimator {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("estimator pipe error: {0}")]
    Pipe(#[from] io::Error),
    #[error("estimator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("estimator wire format error: {0}")]
    Wire(#[from] serde_json::Error),
    #[error("estimator result is missing variant {0}")]
    MissingVariant(String),
    #[error("variant {variant} has {got} values for {expected} frequencies")]
    LengthMismatch {
        variant: String,
        got: usize,
        expected: usize,
    },
    #[error("estimator needs at least one trial matrix")]
    NoData,
}

/// Errors while writing the per-condition CSV report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("incomplete estimator result: {0}")]
    Incomplete(#[from] EstimatorError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The two recognised condition-scoped failures. A skip ends the current
/// condition and the run moves on to the next one.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("Cannot find file: {file}, skipping condition {condition}")]
    MissingInput { file: String, condition: Condition },
    #[error("Only {trials} trials detected in {file}, skipping condition {condition}")]
    InsufficientTrials {
        trials: usize,
        file: String,
        condition: Condition,
    },
    #[error(
        "Sample rate {recorded} Hz in {file} does not match configured {configured} Hz, skipping condition {condition}"
    )]
    SampleRateMismatch {
        recorded: f64,
        configured: f64,
        file: String,
        condition: Condition,
    },
}

/// Everything that can end a condition.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Skip(#[from] SkipReason),
    #[error("cannot create output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Mat(#[from] MatError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(n: u8) -> Condition {
        Condition::new(n).unwrap()
    }

    #[test]
    fn skip_messages_name_file_and_condition() {
        let missing = SkipReason::MissingInput {
            file: "S01_S_8.mat".into(),
            condition: condition(2),
        };
        assert_eq!(missing.to_string(), "Cannot find file: S01_S_8.mat, skipping condition 2");

        let few = SkipReason::InsufficientTrials {
            trials: 20,
            file: "S01_S_1.mat".into(),
            condition: condition(1),
        };
        assert_eq!(few.to_string(), "Only 20 trials detected in S01_S_1.mat, skipping condition 1");

        let rate = SkipReason::SampleRateMismatch {
            recorded: 4096.0,
            configured: 5000.0,
            file: "S01_S_9.mat".into(),
            condition: condition(3),
        };
        assert_eq!(
            rate.to_string(),
            "Sample rate 4096 Hz in S01_S_9.mat does not match configured 5000 Hz, skipping condition 3"
        );
    }

    #[test]
    fn skip_passes_through_driver_error() {
        let err: DriverError = SkipReason::MissingInput {
            file: "S02_S_3.mat".into(),
            condition: condition(3),
        }
        .into();
        assert_eq!(err.to_string(), "Cannot find file: S02_S_3.mat, skipping condition 3");
    }
}
