//! Results of one classifier run.
use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::mode::Mode;

/// Metrics of a finished train / evaluate run.  Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsBundle {
    /// Accuracy per training-subject group.
    pub train: Vec<f64>,
    /// Reserved validation slot, one zero per test subject (no validation
    /// split in this protocol).
    pub val: Vec<f64>,
    /// Accuracy per test-subject group.
    pub test: Vec<f64>,
    /// Per class: `[train subjects, clip TRs]` accuracy by TR.
    pub t_train: BTreeMap<usize, Vec<Vec<f64>>>,
    /// Per class: `[test subjects, clip TRs]` accuracy by TR.
    pub t_test: BTreeMap<usize, Vec<Vec<f64>>>,
    /// `[true, predicted]` counts over all valid test positions.
    pub test_conf_mtx: Vec<Vec<u64>>,
    /// Mean training loss per epoch.
    pub losses: Vec<f64>,
    /// TRs per class used to lay out `t_train` / `t_test`.
    pub clip_time: Vec<usize>,
}

impl ResultsBundle {
    /// Mean test accuracy across subject groups.
    pub fn mean_test_accuracy(&self) -> f64 {
        if self.test.is_empty() {
            return f64::NAN;
        }
        self.test.iter().sum::<f64>() / self.test.len() as f64
    }
}

/// The persisted record: results keyed by the condition they were run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsRecord {
    pub mode: Mode,
    pub test_mode: ResultsBundle,
}

pub(crate) fn rows_of(a: &Array2<f64>) -> Vec<Vec<f64>> {
    a.rows().into_iter().map(|r| r.to_vec()).collect()
}

pub(crate) fn rows_of_u64(a: &Array2<u64>) -> Vec<Vec<u64>> {
    a.rows().into_iter().map(|r| r.to_vec()).collect()
}
