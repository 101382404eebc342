//! Bootstraps modulation-depth statistics (PLV² and spectrum, with a
//! phase-flip noise floor) for every subject and condition 1-3, one CSV per
//! subject/condition.
//!
//! ```text
//! moddepth-analysis dataDir saveDir minTrials subject001 [subject002 ...]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use moddepth_core::{AnalysisParams, CommandEstimator, Driver, RunConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "moddepth-analysis",
    version,
    about = "Bootstrap FFR modulation-depth statistics per subject and condition"
)]
struct Args {
    /// Directory with `{subject}_S_{trigger}.mat` files
    data_dir: PathBuf,

    /// Directory receiving `{subject}_condition_{c}.csv`
    save_dir: PathBuf,

    /// Trials drawn per polarity; files must hold more than this
    min_trials: usize,

    /// Subject names
    #[arg(required = true)]
    subjects: Vec<String>,

    /// Estimator program (reads a JSON request on stdin, writes the result on stdout)
    #[arg(long, env = "MODDEPTH_ESTIMATOR", default_value = "anlffr-bootfunc")]
    estimator: String,

    /// Extra argument for the estimator program (repeatable)
    #[arg(long = "estimator-arg", value_name = "ARG", allow_hyphen_values = true)]
    estimator_args: Vec<String>,

    /// JSON file overriding analysis parameters (Fs, nfft, fpass, tapers, nDraws, threads, ...)
    #[arg(long, value_name = "PATH")]
    params: Option<PathBuf>,

    /// Seed for trial subsampling
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let params = match &args.params {
        Some(path) => AnalysisParams::from_json_file(path, args.min_trials)
            .with_context(|| format!("loading parameters from {}", path.display()))?,
        None => AnalysisParams::new(args.min_trials),
    };
    let config = RunConfig::new(args.data_dir, args.save_dir, params)
        .context("invalid analysis parameters")?;

    let estimator = CommandEstimator::new(args.estimator).with_args(args.estimator_args);
    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        data_dir = %config.data_dir.display(),
        save_dir = %config.save_dir.display(),
        min_trials = config.min_trials(),
        estimator = %estimator,
        phase_flip_noise_floor = config.params.flips_half_trials(),
        subjects = args.subjects.len(),
        "starting batch"
    );

    let mut driver = Driver::new(config, estimator, rng);
    driver.run(args.subjects.as_slice()).context("batch run aborted")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("moddepth-analysis").chain(argv.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn positional_contract_keeps_subject_order() {
        let args = parse(&["/data", "/out", "20", "S03", "S01", "S02"]).unwrap();
        assert_eq!(args.data_dir, PathBuf::from("/data"));
        assert_eq!(args.save_dir, PathBuf::from("/out"));
        assert_eq!(args.min_trials, 20);
        assert_eq!(args.subjects, vec!["S03", "S01", "S02"]);
        assert!(args.params.is_none());
        assert!(args.seed.is_none());
    }

    #[test]
    fn at_least_one_subject_is_required() {
        let err = parse(&["/data", "/out", "20"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn min_trials_must_be_a_count() {
        let err = parse(&["/data", "/out", "twenty", "S01"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn estimator_args_may_start_with_a_hyphen() {
        let args = parse(&[
            "/data", "/out", "20", "S01",
            "--estimator", "python3",
            "--estimator-arg", "-m",
            "--estimator-arg", "anlffr_bootfunc",
            "--seed", "7",
            "--params", "params.json",
        ])
        .unwrap();
        assert_eq!(args.estimator, "python3");
        assert_eq!(args.estimator_args, vec!["-m", "anlffr_bootfunc"]);
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.params, Some(PathBuf::from("params.json")));
        assert_eq!(args.subjects, vec!["S01"]);
    }

    #[test]
    fn estimator_falls_back_to_environment_then_default() {
        std::env::set_var("MODDEPTH_ESTIMATOR", "/opt/bin/bootfunc");
        let from_env = parse(&["/data", "/out", "20", "S01"]).unwrap();
        std::env::remove_var("MODDEPTH_ESTIMATOR");
        assert_eq!(from_env.estimator, "/opt/bin/bootfunc");

        let default = parse(&["/data", "/out", "20", "S01"]).unwrap();
        assert_eq!(default.estimator, "anlffr-bootfunc");
    }
}
