//! File naming for the trigger-coded input files and the per-condition
//! CSV outputs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Offset between a positive-polarity trigger and its negative twin.
pub const NEGATIVE_TRIGGER_OFFSET: u8 = 6;

/// Stimulus condition, numbered 1..=3 as in the recording triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition(u8);

impl Condition {
    pub const ALL: [Condition; 3] = [Condition(1), Condition(2), Condition(3)];

    pub fn new(number: u8) -> Option<Self> {
        (1..=3).contains(&number).then_some(Condition(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Recording trigger carrying this condition at the given polarity.
    pub fn trigger(self, polarity: Polarity) -> u8 {
        match polarity {
            Polarity::Positive => self.0,
            Polarity::Negative => self.0 + NEGATIVE_TRIGGER_OFFSET,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stimulus polarity. Both are loaded for every condition, positive first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const BOTH: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    pub fn label(self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `{subject}_S_{trigger}.mat`
pub fn input_file_name(subject: &str, condition: Condition, polarity: Polarity) -> String {
    format!("{}_S_{}.mat", subject, condition.trigger(polarity))
}

/// `{subject}_condition_{c}.csv`
pub fn output_file_name(subject: &str, condition: Condition) -> String {
    format!("{}_condition_{}.csv", subject, condition)
}

/// Returns a path in `save_dir` that does not exist yet.
///
/// `base_name` is returned unchanged when free; otherwise `_1`, `_2`, ... is
/// appended to its stem until an unused name turns up. The check and the
/// later create are not atomic, so two writers racing on one directory can
/// still collide.
pub fn resolve_output_path(save_dir: &Path, base_name: &str) -> PathBuf {
    let candidate = save_dir.join(base_name);
    if !candidate.exists() {
        return candidate;
    }

    let base = Path::new(base_name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = base.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter: u64 = 0;
    loop {
        counter += 1;
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = save_dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
}
