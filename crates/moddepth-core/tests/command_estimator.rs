#![cfg(unix)]

use std::fs;

use moddepth_core::{AnalysisParams, CommandEstimator, Estimator, EstimatorError, TrialMatrix};
use ndarray::Array3;
use serde_json::{json, Value};

fn response() -> Value {
    let stats = json!({"bootMean": [0.1, 0.2], "bootVariance": [0.01, 0.02]});
    json!({
        "f": [70.0, 80.0],
        "params": {"Fs": 5000.0, "nDraws": 100},
        "results": {
            "mtcpcaPLV_normalPhase": stats,
            "mtcpcaSpectrum_normalPhase": stats,
            "mtcpcaPLV_phaseFlipHalfTrials": stats,
            "mtcpcaSpectrum_phaseFlipHalfTrials": stats
        }
    })
}

fn trials() -> Vec<TrialMatrix> {
    vec![
        TrialMatrix::new(Array3::from_elem((1, 3, 4), 1.0)),
        TrialMatrix::new(Array3::from_elem((1, 3, 4), -1.0)),
    ]
}

#[test]
fn request_goes_to_stdin_and_result_comes_back() {
    let dir = tempfile::tempdir().unwrap();
    let request_path = dir.path().join("request.json");
    let response_path = dir.path().join("response.json");
    fs::write(&response_path, response().to_string()).unwrap();

    let estimator = CommandEstimator::new("sh").with_args([
        "-c".to_string(),
        r#"cat > "$0"; cat "$1""#.to_string(),
        request_path.display().to_string(),
        response_path.display().to_string(),
    ]);
    let result = estimator.estimate(&AnalysisParams::new(3), &trials()).unwrap();
    assert_eq!(result.f, vec![70.0, 80.0]);

    let request: Value = serde_json::from_str(&fs::read_to_string(&request_path).unwrap()).unwrap();
    assert_eq!(request["method"], "mtcpca_complete");
    assert_eq!(request["params"]["nPerDraw"], 3);
    assert_eq!(request["params"]["tapers"], json!([2, 3]));
    assert_eq!(request["data"].as_array().unwrap().len(), 2);
    assert_eq!(request["data"][0]["shape"], json!([1, 3, 4]));
    assert_eq!(request["data"][1]["values"][0], -1.0);
}

#[test]
fn non_zero_exit_reports_stderr() {
    let estimator = CommandEstimator::new("sh")
        .with_args(["-c", "cat > /dev/null; echo 'taper count too high' >&2; exit 3"]);
    match estimator.estimate(&AnalysisParams::new(3), &trials()) {
        Err(EstimatorError::Failed { stderr, .. }) => assert_eq!(stderr, "taper count too high"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn garbage_output_is_a_wire_error() {
    let estimator = CommandEstimator::new("sh").with_args(["-c", "cat > /dev/null; echo not-json"]);
    assert!(matches!(
        estimator.estimate(&AnalysisParams::new(3), &trials()),
        Err(EstimatorError::Wire(_))
    ));
}

#[test]
fn missing_program_fails_to_spawn() {
    let estimator = CommandEstimator::new("/nonexistent/anlffr-bootfunc");
    assert!(matches!(
        estimator.estimate(&AnalysisParams::new(3), &trials()),
        Err(EstimatorError::Spawn { .. })
    ));
}
