mod common;
use approx::assert_abs_diff_eq;
use cliprest::{average_matrix, correlation_matrix, z_score, zscore_columns, AnalysisError};
use common::{feature_names, synthetic_table};
use ndarray::{array, Array2, Axis};

#[test]
fn correlation_is_symmetric_with_unit_diagonal() {
    let t = synthetic_table(&["s"], &["pockets"], 30, 6, 3);
    let c = correlation_matrix(&t.features);
    assert_eq!(c.dim(), (6, 6));
    for i in 0..6 {
        assert_abs_diff_eq!(c[[i, i]], 1.0, epsilon = 1e-12);
        for j in 0..6 {
            assert_abs_diff_eq!(c[[i, j]], c[[j, i]], epsilon = 1e-12);
            assert!(c[[i, j]].abs() <= 1.0);
        }
    }
}

#[test]
fn correlation_of_linear_columns() {
    let x = array![[1.0, 3.0, -2.0], [2.0, 5.0, -4.0], [4.0, 9.0, -8.0], [7.0, 15.0, -14.0]];
    let c = correlation_matrix(&x);
    assert_abs_diff_eq!(c[[0, 1]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(c[[0, 2]], -1.0, epsilon = 1e-12);
}

#[test]
fn correlation_unchanged_by_zscore() {
    let t = synthetic_table(&["s"], &["oceans"], 12, 4, 9);
    let z = zscore_columns(&t.features, &t.feature_names).unwrap();
    let a = correlation_matrix(&t.features);
    let b = correlation_matrix(&z);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
    }
}

#[test]
fn zscore_columns_have_zero_mean_unit_sample_std() {
    let t = synthetic_table(&["s"], &["hotel"], 20, 3, 5);
    let z = zscore_columns(&t.features, &t.feature_names).unwrap();
    let n = z.nrows() as f64;
    for col in z.axis_iter(Axis(1)) {
        let mean = col.sum() / n;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn z_score_uses_sample_std() {
    // mean 2.5, sample std sqrt(5/3)
    let z = z_score(array![1.0, 2.0, 3.0, 4.0].view());
    assert_abs_diff_eq!(z[0], -1.5 / (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
}

#[test]
fn constant_column_is_named() {
    let mut x = Array2::<f64>::zeros((4, 3));
    x.column_mut(0).assign(&array![1.0, 2.0, 3.0, 4.0]);
    x.column_mut(2).assign(&array![0.5, 0.1, 0.3, 0.2]);
    let err = zscore_columns(&x, &feature_names(3)).unwrap_err();
    assert_eq!(err, AnalysisError::DegenerateColumn { column: "f1".into() });
    assert!(z_score(x.column(1)).iter().all(|v| v.is_nan()));
}

#[test]
fn average_is_elementwise_mean() {
    let avg = average_matrix(vec![array![1.0, 2.0], array![3.0, 6.0], array![5.0, 1.0]]).unwrap();
    assert_abs_diff_eq!(avg[0], 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(avg[1], 3.0, epsilon = 1e-12);
    assert!(average_matrix(Vec::<ndarray::Array1<f64>>::new()).is_err());
    assert!(average_matrix(vec![array![1.0], array![1.0, 2.0]]).is_err());
}
