//! Padded multi-subject sequence batches.
//!
//! One sequence per (subject, clip presentation): `features[n, t, f]` holds
//! the TR-`t` activation of presentation `n`, `labels[n, t]` its clip class.
//! Positions `t >= lengths[n]` are padding: zero features and
//! [`PAD_LABEL`].
use std::ops::Range;

use ndarray::{Array2, Array3, Axis};

use crate::error::{AnalysisError, Result};
use crate::table::ActivationTable;

/// Label of padded positions; excluded from loss and accuracy.
pub const PAD_LABEL: i64 = -100;

#[derive(Debug, Clone, PartialEq)]
pub struct PaddedSequenceBatch {
    /// `[N, T, F]`.
    pub features: Array3<f32>,
    /// True length of each sequence, `<= T`.
    pub lengths: Vec<usize>,
    /// `[N, T]`, [`PAD_LABEL`] past each length.
    pub labels: Array2<i64>,
    /// Subject each sequence belongs to.
    pub subjects: Vec<String>,
}

impl PaddedSequenceBatch {
    /// Validate shapes and the padding invariant.
    pub fn new(
        features: Array3<f32>,
        lengths: Vec<usize>,
        labels: Array2<i64>,
        subjects: Vec<String>,
    ) -> Result<Self> {
        let (n, t, _) = features.dim();
        if labels.dim() != (n, t) {
            return Err(AnalysisError::shape("batch labels", format!("{n}x{t}"),
                format!("{}x{}", labels.nrows(), labels.ncols())));
        }
        if lengths.len() != n || subjects.len() != n {
            return Err(AnalysisError::shape("batch lengths/subjects", n,
                format!("{}/{}", lengths.len(), subjects.len())));
        }
        for (i, &len) in lengths.iter().enumerate() {
            if len > t {
                return Err(AnalysisError::shape("sequence length", format!("<= {t}"), len));
            }
            let row = labels.row(i);
            if row.iter().enumerate().any(|(p, &y)| (p < len) == (y == PAD_LABEL)) {
                return Err(AnalysisError::shape(
                    "padding",
                    format!("{len} labelled positions in sequence {i}"),
                    format!("{:?}", row.to_vec()),
                ));
            }
        }
        Ok(Self { features, lengths, labels, subjects })
    }

    pub fn n_sequences(&self) -> usize {
        self.lengths.len()
    }

    /// Padded width `T`.
    pub fn max_length(&self) -> usize {
        self.labels.ncols()
    }

    pub fn n_features(&self) -> usize {
        self.features.dim().2
    }

    /// `[N, T]`: true where `t < lengths[n]`.
    pub fn mask(&self) -> Array2<bool> {
        mask(&self.lengths, self.max_length())
    }

    /// Sequences at `idx`, in that order.
    pub fn select(&self, idx: &[usize]) -> PaddedSequenceBatch {
        PaddedSequenceBatch {
            features: self.features.select(Axis(0), idx),
            lengths: idx.iter().map(|&i| self.lengths[i]).collect(),
            labels: self.labels.select(Axis(0), idx),
            subjects: idx.iter().map(|&i| self.subjects[i].clone()).collect(),
        }
    }

    /// Number of distinct subjects.
    pub fn n_subjects(&self) -> usize {
        let mut s: Vec<&String> = self.subjects.iter().collect();
        s.sort();
        s.dedup();
        s.len()
    }
}

/// Validity mask for `lengths` padded to `max_length`.
pub fn mask(lengths: &[usize], max_length: usize) -> Array2<bool> {
    Array2::from_shape_fn((lengths.len(), max_length), |(n, t)| t < lengths[n])
}

/// Keep TRs in `range` and shift them so the window starts at 0.
pub fn time_window(table: &ActivationTable, range: &Range<i64>) -> ActivationTable {
    let mut out = table.filter_rows(|r| range.contains(&table.ticks[r]));
    if range.start != 0 {
        out.ticks.iter_mut().for_each(|t| *t -= range.start);
    }
    out
}

/// TRs per class: max tick + 1 over the rows of that class.
pub fn clip_time_lengths(table: &ActivationTable, k_class: usize) -> Result<Vec<usize>> {
    let mut max_tick: Vec<Option<i64>> = vec![None; k_class];
    for r in 0..table.n_rows() {
        let c = table.class_of(r).ok_or_else(|| AnalysisError::UnknownLabel(table.labels[r].clone()))?;
        if c >= k_class {
            return Err(AnalysisError::shape("class id", format!("< {k_class}"), c));
        }
        let m = &mut max_tick[c];
        *m = Some(m.map_or(table.ticks[r], |v| v.max(table.ticks[r])));
    }
    max_tick
        .into_iter()
        .enumerate()
        .map(|(c, m)| {
            m.map(|t| (t + 1).max(0) as usize)
                .ok_or_else(|| AnalysisError::EmptyGroup { what: format!("class {c} has no rows") })
        })
        .collect()
}

/// Build padded sequences for `subjects`, in the given subject order and
/// table row order within a subject.
///
/// A new presentation starts whenever the label changes or the tick does
/// not increase.  Sequences are padded to `pad_to` (or to the longest
/// presentation when `None`).
pub fn build_sequences<S: AsRef<str>>(
    table: &ActivationTable,
    subjects: &[S],
    pad_to: Option<usize>,
) -> Result<PaddedSequenceBatch> {
    // (subject, row indices) per presentation
    let mut runs: Vec<(String, Vec<usize>)> = Vec::new();
    for subject in subjects {
        let subject = subject.as_ref();
        let mut current: Vec<usize> = Vec::new();
        for r in (0..table.n_rows()).filter(|&r| table.subjects[r] == subject) {
            if let Some(&prev) = current.last() {
                if table.labels[prev] != table.labels[r] || table.ticks[r] <= table.ticks[prev] {
                    runs.push((subject.to_string(), std::mem::take(&mut current)));
                }
            }
            current.push(r);
        }
        if current.is_empty() && !runs.iter().any(|(s, _)| s == subject) {
            return Err(AnalysisError::Empty { what: "subject rows" });
        }
        if !current.is_empty() {
            runs.push((subject.to_string(), current));
        }
    }
    if runs.is_empty() {
        return Err(AnalysisError::Empty { what: "sequences" });
    }

    let longest = runs.iter().map(|(_, rows)| rows.len()).max().unwrap_or(0);
    let width = pad_to.unwrap_or(longest);
    if width < longest {
        return Err(AnalysisError::shape("pad_to", format!(">= {longest}"), width));
    }

    let n = runs.len();
    let k = table.n_features();
    let mut features = Array3::<f32>::zeros((n, width, k));
    let mut labels = Array2::<i64>::from_elem((n, width), PAD_LABEL);
    let mut lengths = Vec::with_capacity(n);
    let mut seq_subjects = Vec::with_capacity(n);
    for (i, (subject, rows)) in runs.into_iter().enumerate() {
        for (t, &r) in rows.iter().enumerate() {
            let c = table.class_of(r).ok_or_else(|| AnalysisError::UnknownLabel(table.labels[r].clone()))?;
            labels[[i, t]] = c as i64;
            features
                .slice_mut(ndarray::s![i, t, ..])
                .assign(&table.features.row(r).mapv(|v| v as f32));
        }
        lengths.push(rows.len());
        seq_subjects.push(subject);
    }
    PaddedSequenceBatch::new(features, lengths, labels, seq_subjects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2 as A2;

    fn table() -> ActivationTable {
        // subject s1: clip 1 (ticks 0..3), clip 2 (ticks 0..2); subject s2: clip 1 (0..2)
        let subjects = ["s1", "s1", "s1", "s1", "s1", "s2", "s2"];
        let labels = ["1", "1", "1", "2", "2", "1", "1"];
        let ticks = [0, 1, 2, 0, 1, 0, 1];
        ActivationTable::with_subjects(
            subjects.iter().map(|s| s.to_string()).collect(),
            labels.iter().map(|s| s.to_string()).collect(),
            ticks.to_vec(),
            A2::from_shape_fn((7, 2), |(r, c)| (r * 2 + c) as f64),
            vec!["f0".into(), "f1".into()],
        )
        .unwrap()
    }

    #[test]
    fn sequences_split_on_label_change() {
        let b = build_sequences(&table(), &["s1", "s2"], None).unwrap();
        assert_eq!(b.lengths, vec![3, 2, 2]);
        assert_eq!(b.subjects, vec!["s1", "s1", "s2"]);
        assert_eq!(b.labels.row(1).to_vec(), vec![2, 2, PAD_LABEL]);
        assert_eq!(b.features[[2, 1, 1]], 13.0);
        assert_eq!(b.n_subjects(), 2);
    }

    #[test]
    fn mask_matches_lengths() {
        let m = mask(&[2, 0, 3], 3);
        assert_eq!(m.row(0).to_vec(), vec![true, true, false]);
        assert_eq!(m.row(1).to_vec(), vec![false, false, false]);
        assert_eq!(m.row(2).to_vec(), vec![true, true, true]);
    }

    #[test]
    fn time_window_rebases_ticks() {
        let w = time_window(&table(), &(1..3));
        assert_eq!(w.ticks, vec![0, 1, 0, 0]);
    }

    #[test]
    fn clip_lengths_per_class() {
        // class 0 absent
        let lens = clip_time_lengths(&table(), 3);
        assert!(matches!(lens, Err(AnalysisError::EmptyGroup { .. })));

        let mut t = table();
        for l in t.labels.iter_mut() {
            *l = if *l == "1" { "0".into() } else { "1".into() };
        }
        assert_eq!(clip_time_lengths(&t, 2).unwrap(), vec![3, 2]);
    }

    #[test]
    fn padding_invariant_enforced() {
        let feats = Array3::zeros((1, 3, 1));
        let labels = A2::from_shape_vec((1, 3), vec![1, PAD_LABEL, 1]).unwrap();
        assert!(PaddedSequenceBatch::new(feats, vec![1], labels, vec!["s".into()]).is_err());
    }
}
