//! Batch analysis of frequency-following responses: load paired-polarity
//! trial matrices from MAT files, subsample trials, hand them to an external
//! multi-taper/bootstrap estimator and write per-frequency summaries as CSV.

pub mod driver;
pub mod error;
pub mod estimator;
pub mod mat;
pub mod naming;
pub mod params;
pub mod report;
pub mod trials;

pub use driver::{load_trials, ConditionOutcome, ConditionReport, Driver, RunConfig, RunSummary};
pub use error::{DriverError, EstimatorError, MatError, ParamsError, ReportError, SkipReason};
pub use estimator::{BootStats, BootstrapResult, CommandEstimator, Estimator, Measure, Phase};
pub use mat::{MatArray, MatFile};
pub use naming::{resolve_output_path, Condition, Polarity};
pub use params::AnalysisParams;
pub use report::{write_report, HEADER};
pub use trials::{draw_trial_subset, TrialMatrix};
