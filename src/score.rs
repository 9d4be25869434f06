//! Masked accuracy of a sequence classifier on a padded batch.
//!
//! 1. mask `[N, T]` from the true lengths
//! 2. forward pass, arg-max over classes
//! 3. flatten predictions and labels through the mask (sequence-major, then TR)
//! 4. split the flat vectors into `k_sub` equal contiguous groups → accuracy per group
//! 5. per class: positions whose true label is that class, split into
//!    `k_sub` groups, accuracy per TR slot at stride `clip_time[class]`
//! 6. confusion matrix over all valid positions
//!
//! Steps 4–5 assume every subject contributes the same number of valid
//! positions and every presentation of a class spans exactly
//! `clip_time[class]` TRs.  Empty groups or slots are reported as
//! [`AnalysisError::EmptyGroup`] rather than divided by.
use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{AnalysisError, Result};
use crate::model::SequenceClassifier;
use crate::sequence::PaddedSequenceBatch;

/// Scorer output.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    /// Accuracy of each of the `k_sub` contiguous groups.
    pub group_accuracy: Array1<f64>,
    /// Per class: `[k_sub, clip_time[class]]` accuracy by TR.
    pub time_accuracy: BTreeMap<usize, Array2<f64>>,
    /// `[true, predicted]` counts, `K × K`.
    pub confusion: Array2<u64>,
    /// Number of valid (non-padded) positions scored.
    pub n_scored: usize,
}

impl Scores {
    pub fn mean_accuracy(&self) -> f64 {
        self.group_accuracy.mean().unwrap_or(f64::NAN)
    }
}

/// Arg-max over the class axis of `[N, T, K]` logits.
pub fn predicted_labels(logits: &Array3<f32>) -> Array2<i64> {
    logits.map_axis(Axis(2), |row| {
        row.iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
            .0 as i64
    })
}

/// Keep positions where `mask` is true, sequence-major.
pub fn flatten_masked(values: &Array2<i64>, mask: &Array2<bool>) -> Vec<i64> {
    values
        .iter()
        .zip(mask.iter())
        .filter_map(|(&v, &keep)| keep.then_some(v))
        .collect()
}

fn accuracy(y_hat: &[i64], y: &[i64]) -> f64 {
    let correct = y_hat.iter().zip(y).filter(|(p, q)| p == q).count();
    correct as f64 / y.len() as f64
}

/// Accuracy of `k_sub` equal contiguous groups.  Trailing positions that
/// do not fill a group are ignored.
pub fn group_accuracy(y_hat: &[i64], y: &[i64], k_sub: usize) -> Result<Array1<f64>> {
    let size = if k_sub == 0 { 0 } else { y.len() / k_sub };
    if size == 0 {
        return Err(AnalysisError::EmptyGroup {
            what: format!("{} positions cannot fill {k_sub} groups", y.len()),
        });
    }
    Ok((0..k_sub)
        .map(|s| accuracy(&y_hat[s * size..(s + 1) * size], &y[s * size..(s + 1) * size]))
        .collect())
}

/// Accuracy by TR slot: slot `i` scores positions `i, i + k_time, i + 2·k_time, …`.
pub fn time_accuracy(y_hat: &[i64], y: &[i64], k_time: usize) -> Result<Array1<f64>> {
    (0..k_time)
        .map(|i| {
            let y_i: Vec<i64> = y.iter().skip(i).step_by(k_time).copied().collect();
            let y_hat_i: Vec<i64> = y_hat.iter().skip(i).step_by(k_time).copied().collect();
            if y_i.is_empty() {
                return Err(AnalysisError::EmptyGroup { what: format!("TR slot {i} of {k_time}") });
            }
            Ok(accuracy(&y_hat_i, &y_i))
        })
        .collect()
}

/// Counts of `(true, predicted)` pairs, rows = true class.
pub fn confusion_matrix(y: &[i64], y_hat: &[i64], k_class: usize) -> Result<Array2<u64>> {
    let mut m = Array2::<u64>::zeros((k_class, k_class));
    for (&t, &p) in y.iter().zip(y_hat) {
        let in_range = |c: i64| c >= 0 && (c as usize) < k_class;
        if !in_range(t) || !in_range(p) {
            return Err(AnalysisError::shape("confusion label", format!("0..{k_class}"), format!("({t}, {p})")));
        }
        m[[t as usize, p as usize]] += 1;
    }
    Ok(m)
}

/// Score `model` on `batch`.
///
/// `clip_time[c]` is the TR count of class `c`; `k_sub` the number of
/// subject groups (normally the number of distinct subjects in `batch`).
pub fn masked_accuracy<M: SequenceClassifier + ?Sized>(
    model: &M,
    batch: &PaddedSequenceBatch,
    max_length: usize,
    clip_time: &[usize],
    k_sub: usize,
) -> Result<Scores> {
    if batch.max_length() != max_length {
        return Err(AnalysisError::shape("scored batch width", max_length, batch.max_length()));
    }
    let k_class = model.num_classes();
    if clip_time.len() != k_class {
        return Err(AnalysisError::shape("clip_time classes", k_class, clip_time.len()));
    }

    let mask = batch.mask();
    let logits = model.forward(&batch.features, &batch.lengths, max_length)?;
    if logits.dim() != (batch.n_sequences(), max_length, k_class) {
        return Err(AnalysisError::shape(
            "classifier output",
            format!("{:?}", (batch.n_sequences(), max_length, k_class)),
            format!("{:?}", logits.dim()),
        ));
    }
    let y_hat = flatten_masked(&predicted_labels(&logits), &mask);
    let y = flatten_masked(&batch.labels, &mask);

    let group = group_accuracy(&y_hat, &y, k_sub)?;

    let mut time = BTreeMap::new();
    for (class, &k_time) in clip_time.iter().enumerate() {
        let (y_i, y_hat_i): (Vec<i64>, Vec<i64>) = y
            .iter()
            .zip(&y_hat)
            .filter(|&(&t, _)| t == class as i64)
            .map(|(&t, &p)| (t, p))
            .unzip();
        let size = y_i.len() / k_sub.max(1);
        if size == 0 {
            return Err(AnalysisError::EmptyGroup {
                what: format!("class {class}: {} positions for {k_sub} groups", y_i.len()),
            });
        }
        let mut acc = Array2::<f64>::zeros((k_sub, k_time));
        for s in 0..k_sub {
            let range = s * size..(s + 1) * size;
            let row = time_accuracy(&y_hat_i[range.clone()], &y_i[range], k_time).map_err(|e| match e {
                AnalysisError::EmptyGroup { what } => AnalysisError::EmptyGroup {
                    what: format!("class {class}, group {s}: {what}"),
                },
                other => other,
            })?;
            acc.row_mut(s).assign(&row);
        }
        time.insert(class, acc);
    }

    let confusion = confusion_matrix(&y, &y_hat, k_class)?;
    Ok(Scores { group_accuracy: group, time_accuracy: time, confusion, n_scored: y.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_largest() {
        let logits = Array3::from_shape_vec((1, 2, 3), vec![0.1, 0.7, 0.2, 2.0, -1.0, 0.0]).unwrap();
        assert_eq!(predicted_labels(&logits).row(0).to_vec(), vec![1, 0]);
    }

    #[test]
    fn time_accuracy_strides() {
        // two presentations of a 3-TR clip: slot 0 right twice, slot 1 once, slot 2 never
        let y = [4, 4, 4, 4, 4, 4];
        let y_hat = [4, 4, 0, 4, 0, 0];
        let a = time_accuracy(&y_hat, &y, 3).unwrap();
        assert_eq!(a.to_vec(), vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn time_slot_without_samples_is_error() {
        assert!(matches!(time_accuracy(&[1], &[1], 2), Err(AnalysisError::EmptyGroup { .. })));
    }

    #[test]
    fn groups_ignore_remainder() {
        let a = group_accuracy(&[1, 1, 0, 0, 9], &[1, 1, 1, 0, 0], 2).unwrap();
        assert_eq!(a.to_vec(), vec![1.0, 0.5]);
        assert!(group_accuracy(&[1], &[1], 2).is_err());
    }

    #[test]
    fn confusion_rows_are_truth() {
        let m = confusion_matrix(&[0, 0, 1], &[0, 1, 1], 2).unwrap();
        assert_eq!(m, ndarray::array![[1, 1], [0, 1]]);
        assert!(confusion_matrix(&[2], &[0], 2).is_err());
    }
}
