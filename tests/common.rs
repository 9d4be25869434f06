/// Shared synthetic fixtures.
use cliprest::{ActivationTable, Mode, SubjectStore};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::fmt::Write as _;
use std::path::Path;

#[allow(unused)]
pub fn feature_names(k: usize) -> Vec<String> {
    (0..k).map(|i| format!("f{i}")).collect()
}

#[allow(unused)]
/// `subjects × clips × n_tr` rows, ticks `0..n_tr` per clip, uniform
/// random features in `[-1, 1)`.
pub fn synthetic_table(subjects: &[&str], clips: &[&str], n_tr: usize, n_feat: usize, seed: u64) -> ActivationTable {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let (mut subj, mut labels, mut ticks) = (vec![], vec![], vec![]);
    for s in subjects {
        for c in clips {
            for t in 0..n_tr {
                subj.push(s.to_string());
                labels.push(c.to_string());
                ticks.push(t as i64);
            }
        }
    }
    let features = Array2::from_shape_fn((ticks.len(), n_feat), |_| rng.gen_range(-1.0..1.0));
    ActivationTable::with_subjects(subj, labels, ticks, features, feature_names(n_feat)).unwrap()
}

#[allow(unused)]
/// Write `table` in the `Subject,y,timepoint,f0..` layout.
pub fn write_table_csv(table: &ActivationTable, path: &Path) {
    let mut out = String::from("Subject,y,timepoint");
    for name in &table.feature_names {
        write!(out, ",{name}").unwrap();
    }
    out.push('\n');
    for r in 0..table.n_rows() {
        write!(out, "{},{},{}", table.subjects[r], table.labels[r], table.ticks[r]).unwrap();
        for v in table.features.row(r) {
            write!(out, ",{v}").unwrap();
        }
        out.push('\n');
    }
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, out).unwrap();
}

#[allow(unused)]
/// Populate `store` with one table per subject and mode.
pub fn populate_store(store: &SubjectStore, subjects: &[&str], modes: &[Mode], clips: &[&str], n_tr: usize, n_feat: usize) {
    for (i, s) in subjects.iter().enumerate() {
        for (j, &mode) in modes.iter().enumerate() {
            let table = synthetic_table(&[s], clips, n_tr, n_feat, 1000 + (i * 10 + j) as u64);
            write_table_csv(&table, &store.activation_path(s, mode));
        }
    }
}
