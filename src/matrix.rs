//! Column z-score, Pearson correlation matrices and element-wise averaging.
//!
//! `z_score`             : (x − μ) / σ over one column, σ with ddof = 1
//!                         (pandas `Series.std`), unguarded.
//! `zscore_columns`      : the same per column of a matrix, rejecting
//!                         zero-variance columns.
//! `correlation_matrix`  : Pearson r between every pair of columns.
//! `average_matrix`      : element-wise mean of equal-length vectors.
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{AnalysisError, Result};

/// Mean and sample standard deviation (ddof = 1) of `x`.
fn mean_std(x: ArrayView1<f64>) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let var = x.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Z-score one column.
///
/// Precondition: the column has at least two values and nonzero variance.
/// A constant column yields NaN everywhere; use [`zscore_columns`] when the
/// input is not known to be clean.
pub fn z_score(column: ArrayView1<f64>) -> Array1<f64> {
    let (mean, std) = mean_std(column);
    column.mapv(|v| (v - mean) / std)
}

/// Z-score every column of `[rows, cols]` data.
///
/// Returns [`AnalysisError::DegenerateColumn`] naming the first column whose
/// variance is zero (or non-finite) instead of producing NaNs.
pub fn zscore_columns(data: &Array2<f64>, names: &[String]) -> Result<Array2<f64>> {
    if data.nrows() < 2 {
        return Err(AnalysisError::shape("zscore_columns", ">= 2 rows", data.nrows()));
    }
    let mut out = data.clone();
    for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
        let (mean, std) = mean_std(col.view());
        if !(std.is_finite() && std > 0.0) {
            let column = names.get(j).cloned().unwrap_or_else(|| j.to_string());
            return Err(AnalysisError::DegenerateColumn { column });
        }
        col.mapv_inplace(|v| (v - mean) / std);
    }
    Ok(out)
}

/// Pearson correlation between every pair of columns of `[rows, k]` data.
///
/// Output is `[k, k]`, symmetric with a unit diagonal for non-degenerate
/// columns.  A zero-variance column produces NaN in its row and column.
pub fn correlation_matrix(data: &Array2<f64>) -> Array2<f64> {
    let k = data.ncols();
    let means = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k));
    let centered = data - &means.insert_axis(Axis(0));
    let cov = centered.t().dot(&centered);

    let norms: Array1<f64> = cov.diag().mapv(f64::sqrt);
    let mut corr = Array2::<f64>::zeros((k, k));
    for i in 0..k {
        for j in i..k {
            let r = if i == j {
                if norms[i] > 0.0 { 1.0 } else { f64::NAN }
            } else {
                (cov[[i, j]] / (norms[i] * norms[j])).clamp(-1.0, 1.0)
            };
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

/// Element-wise mean of a sequence of equal-length vectors.
pub fn average_matrix<I>(vectors: I) -> Result<Array1<f64>>
where
    I: IntoIterator<Item = Array1<f64>>,
{
    let mut iter = vectors.into_iter();
    let mut acc = iter.next().ok_or(AnalysisError::Empty { what: "average_matrix input" })?;
    let mut count = 1usize;
    for v in iter {
        if v.len() != acc.len() {
            return Err(AnalysisError::shape("average_matrix", acc.len(), v.len()));
        }
        acc += &v;
        count += 1;
    }
    acc /= count as f64;
    Ok(acc)
}
