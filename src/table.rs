//! In-memory tables.
//!
//! `ActivationTable` : one row per TR: `[subject], label, tick, feat_1..feat_k`.
//! `LabeledMatrix`   : a dense `f64` matrix with row and column labels, the
//!                     shape every correlation result is persisted in.
use ndarray::{Array1, Array2, Axis};

use crate::error::{AnalysisError, Result};
use crate::mode::clip_index;

/// Per-TR activation values for one or more subjects.
///
/// Invariant: within one clip presentation ticks are strictly increasing.
/// `subjects`, `labels` and `ticks` all have `features.nrows()` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationTable {
    /// Subject id per row (empty string when the table has no subject column).
    pub subjects: Vec<String>,
    /// Clip / condition label per row.
    pub labels: Vec<String>,
    /// TR index per row.
    pub ticks: Vec<i64>,
    /// `[rows, k]` feature magnitudes.
    pub features: Array2<f64>,
    /// Feature column names, `k` entries.
    pub feature_names: Vec<String>,
}

impl ActivationTable {
    /// Build a single-subject table, checking that all columns line up.
    pub fn new(
        labels: Vec<String>,
        ticks: Vec<i64>,
        features: Array2<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let subjects = vec![String::new(); labels.len()];
        Self::with_subjects(subjects, labels, ticks, features, feature_names)
    }

    pub fn with_subjects(
        subjects: Vec<String>,
        labels: Vec<String>,
        ticks: Vec<i64>,
        features: Array2<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let n = features.nrows();
        for (what, len) in [("subjects", subjects.len()), ("labels", labels.len()), ("ticks", ticks.len())] {
            if len != n {
                return Err(AnalysisError::shape("ActivationTable columns", n, format!("{len} {what}")));
            }
        }
        if feature_names.len() != features.ncols() {
            return Err(AnalysisError::shape(
                "ActivationTable feature names",
                features.ncols(),
                feature_names.len(),
            ));
        }
        Ok(Self { subjects, labels, ticks, features, feature_names })
    }

    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Keep the rows whose index satisfies `keep`, in table order.
    pub fn filter_rows(&self, mut keep: impl FnMut(usize) -> bool) -> ActivationTable {
        let idx: Vec<usize> = (0..self.n_rows()).filter(|&r| keep(r)).collect();
        self.take_rows(&idx)
    }

    /// Rows at `idx`, in the given order.
    pub fn take_rows(&self, idx: &[usize]) -> ActivationTable {
        ActivationTable {
            subjects: idx.iter().map(|&r| self.subjects[r].clone()).collect(),
            labels: idx.iter().map(|&r| self.labels[r].clone()).collect(),
            ticks: idx.iter().map(|&r| self.ticks[r]).collect(),
            features: self.features.select(Axis(0), idx),
            feature_names: self.feature_names.clone(),
        }
    }

    /// Rows belonging to `clip`.
    pub fn clip_rows(&self, clip: &str) -> ActivationTable {
        self.filter_rows(|r| self.labels[r] == clip)
    }

    /// Rows belonging to `subject`.
    pub fn subject_rows(&self, subject: &str) -> ActivationTable {
        self.filter_rows(|r| self.subjects[r] == subject)
    }

    /// Distinct clip labels, sorted by catalogue index; labels outside the
    /// catalogue (including numeric class ids) follow, sorted naturally.
    pub fn clips(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for l in &self.labels {
            if !out.contains(l) {
                out.push(l.clone());
            }
        }
        out.sort_by(|a, b| label_order_key(a).cmp(&label_order_key(b)));
        out
    }

    /// Distinct subject ids, sorted ascending.
    pub fn subject_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = self.subjects.clone();
        out.sort();
        out.dedup();
        out
    }

    /// Class id of row `r`: numeric labels parse directly, clip names map
    /// through the catalogue.
    pub fn class_of(&self, r: usize) -> Option<usize> {
        let label = self.labels[r].trim();
        label
            .parse::<f64>()
            .ok()
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize)
            .or_else(|| clip_index(label))
    }
}

fn label_order_key(label: &str) -> (usize, usize, String) {
    if let Some(i) = clip_index(label) {
        return (0, i, label.to_string());
    }
    match label.trim().parse::<f64>() {
        Ok(v) if v >= 0.0 => (1, v as usize, label.to_string()),
        _ => (2, 0, label.to_string()),
    }
}

/// Dense matrix with labelled axes.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub data: Array2<f64>,
}

/// Matrix axis selector for [`crate::correlation::rearrange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixAxis {
    Rows,
    Columns,
}

impl LabeledMatrix {
    pub fn new(row_labels: Vec<String>, col_labels: Vec<String>, data: Array2<f64>) -> Result<Self> {
        if data.dim() != (row_labels.len(), col_labels.len()) {
            return Err(AnalysisError::shape(
                "LabeledMatrix",
                format!("{}x{}", row_labels.len(), col_labels.len()),
                format!("{}x{}", data.nrows(), data.ncols()),
            ));
        }
        Ok(Self { row_labels, col_labels, data })
    }

    /// Square matrix sharing one label set on both axes.
    pub fn square(labels: Vec<String>, data: Array2<f64>) -> Result<Self> {
        Self::new(labels.clone(), labels, data)
    }

    /// Build from named columns of equal length.
    pub fn from_columns(row_labels: Vec<String>, columns: Vec<(String, Array1<f64>)>) -> Result<Self> {
        let n = row_labels.len();
        let mut data = Array2::zeros((n, columns.len()));
        let mut col_labels = Vec::with_capacity(columns.len());
        for (j, (name, col)) in columns.into_iter().enumerate() {
            if col.len() != n {
                return Err(AnalysisError::shape("LabeledMatrix column", n, format!("{} in '{name}'", col.len())));
            }
            data.column_mut(j).assign(&col);
            col_labels.push(name);
        }
        Ok(Self { row_labels, col_labels, data })
    }

    pub fn labels(&self, axis: MatrixAxis) -> &[String] {
        match axis {
            MatrixAxis::Rows => &self.row_labels,
            MatrixAxis::Columns => &self.col_labels,
        }
    }

    /// Select (and reorder) entries along `axis`.
    pub fn select(&self, axis: MatrixAxis, idx: &[usize]) -> LabeledMatrix {
        match axis {
            MatrixAxis::Rows => LabeledMatrix {
                row_labels: idx.iter().map(|&i| self.row_labels[i].clone()).collect(),
                col_labels: self.col_labels.clone(),
                data: self.data.select(Axis(0), idx),
            },
            MatrixAxis::Columns => LabeledMatrix {
                row_labels: self.row_labels.clone(),
                col_labels: idx.iter().map(|&i| self.col_labels[i].clone()).collect(),
                data: self.data.select(Axis(1), idx),
            },
        }
    }

    pub fn row_index(&self, label: &str) -> Option<usize> {
        self.row_labels.iter().position(|l| l == label)
    }

    pub fn col_index(&self, label: &str) -> Option<usize> {
        self.col_labels.iter().position(|l| l == label)
    }

    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        Some(self.data[[self.row_index(row)?, self.col_index(col)?]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> ActivationTable {
        ActivationTable::new(
            vec!["pockets".into(), "testretest".into(), "pockets".into(), "7".into()],
            vec![0, 0, 1, 0],
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]],
            vec!["f1".into(), "f2".into()],
        )
        .unwrap()
    }

    #[test]
    fn clips_sorted_by_catalogue() {
        assert_eq!(table().clips(), vec!["testretest", "pockets", "7"]);
    }

    #[test]
    fn clip_rows_keeps_order() {
        let t = table().clip_rows("pockets");
        assert_eq!(t.ticks, vec![0, 1]);
        assert_eq!(t.features, array![[1.0, 2.0], [5.0, 6.0]]);
    }

    #[test]
    fn class_of_parses_numbers_and_names() {
        let t = table();
        assert_eq!(t.class_of(0), Some(3));
        assert_eq!(t.class_of(1), Some(0));
        assert_eq!(t.class_of(3), Some(7));
    }

    #[test]
    fn mismatched_columns_rejected() {
        let err = ActivationTable::new(vec!["a".into()], vec![0, 1], Array2::zeros((2, 1)), vec!["f".into()]);
        assert!(matches!(err, Err(AnalysisError::ShapeMismatch { .. })));
    }

    #[test]
    fn select_columns_reorders_labels() {
        let m = LabeledMatrix::square(
            vec!["a".into(), "b".into()],
            array![[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap();
        let s = m.select(MatrixAxis::Columns, &[1, 0]);
        assert_eq!(s.col_labels, vec!["b", "a"]);
        assert_eq!(s.data, array![[2.0, 1.0], [4.0, 3.0]]);
        assert_eq!(s.get("a", "b"), Some(2.0));
    }
}
