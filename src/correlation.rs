//! Clip / rest correlation pipeline.
//!
//! Per subject and per clip:
//!
//! ```text
//! activation_matrix.csv  (<root>/<subject>/<mode>/)
//!   │
//!   ├─ clip_rows          one clip's TRs
//!   ├─ extract_window     fixed TR window, feature columns only
//!   ├─ zscore_columns     per feature
//!   ├─ correlation_matrix feature × feature
//!   └─ set_activation_vectors / join_and_correlate
//!        │
//!        └─→ <root>/<subject>/corr_mat_<window>.csv   (clip+rest) × (clip+rest)
//! ```
//!
//! Subjects are independent.  A failing subject is logged with its id and
//! recorded in the [`PipelineReport`]; the remaining subjects still run.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use ndarray::{concatenate, Array1, Array2, Axis};
use tracing::{debug, info, warn};

use crate::config::CorrelationConfig;
use crate::error::{AnalysisError, Result};
use crate::matrix::{average_matrix, correlation_matrix, zscore_columns};
use crate::mode::{clip_index, clip_key, split_clip_key, Mode, TEST_RETEST};
use crate::table::{ActivationTable, LabeledMatrix, MatrixAxis};
use crate::window::{extract_window, single_tick, WindowSpec};

/// Correlation matrices of one subject, keyed `{clip}_{mode}`, in clip
/// catalogue order.
pub type ClipMatrices = Vec<(String, LabeledMatrix)>;

/// File layout of per-subject activation tables.
#[derive(Debug, Clone)]
pub struct SubjectStore {
    root: PathBuf,
}

impl SubjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<subject>/<mode>/activation_matrix.csv`
    pub fn activation_path(&self, subject: &str, mode: Mode) -> PathBuf {
        self.root.join(subject).join(mode.as_str()).join("activation_matrix.csv")
    }

    pub fn load(&self, subject: &str, mode: Mode) -> anyhow::Result<ActivationTable> {
        let path = self.activation_path(subject, mode);
        ActivationTable::load_csv(&path).with_context(|| format!("subject {subject} ({mode})"))
    }

    /// `<root>/<subject>/<name>.csv`
    pub fn output_path(&self, subject: &str, name: &str) -> PathBuf {
        self.root.join(subject).join(format!("{name}.csv"))
    }
}

/// Outcome of a best-effort batch over subjects.
#[derive(Debug)]
pub struct PipelineReport<T> {
    pub completed: BTreeMap<String, T>,
    /// Subject id → error chain.
    pub failed: BTreeMap<String, String>,
}

impl<T> Default for PipelineReport<T> {
    fn default() -> Self {
        Self { completed: BTreeMap::new(), failed: BTreeMap::new() }
    }
}

impl<T> PipelineReport<T> {
    /// Store one subject's outcome, logging failures.
    pub fn record(&mut self, subject: &str, outcome: anyhow::Result<T>) {
        match outcome {
            Ok(v) => {
                self.completed.insert(subject.to_string(), v);
            }
            Err(e) => {
                warn!(subject, error = %format!("{e:#}"), "subject failed, continuing");
                self.failed.insert(subject.to_string(), format!("{e:#}"));
            }
        }
    }

    /// True when at least one subject failed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// A result computed from the subjects that succeeded, with the ones left
/// out.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial<T> {
    pub value: T,
    /// Subject id → why it was left out.
    pub skipped: BTreeMap<String, String>,
}

impl<T> Partial<T> {
    /// True when at least one subject was left out.
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        Partial { value: f(self.value), skipped: self.skipped }
    }
}

/// Window → z-score → correlate for every clip of one table.
pub fn auto_correlate_table(
    table: &ActivationTable,
    mode: Mode,
    window: Option<&WindowSpec>,
) -> anyhow::Result<ClipMatrices> {
    let mut out = Vec::new();
    for clip in table.clips() {
        let clip_table = table.clip_rows(&clip);
        let corr = correlate_clip(&clip_table, window).with_context(|| format!("clip {clip}"))?;
        debug!(clip = %clip, %mode, n_features = corr.data.nrows(), "clip correlated");
        out.push((clip_key(&clip, mode), corr));
    }
    Ok(out)
}

fn correlate_clip(clip_table: &ActivationTable, window: Option<&WindowSpec>) -> Result<LabeledMatrix> {
    let data = match window {
        Some(spec) => extract_window(clip_table, spec)?,
        None => clip_table.features.clone(),
    };
    let z = zscore_columns(&data, &clip_table.feature_names)?;
    LabeledMatrix::square(clip_table.feature_names.clone(), correlation_matrix(&z))
}

/// Flatten each clip's correlation matrix (strict upper triangle, row-major)
/// into one column.  Rows are feature pairs `"{i}-{j}"`.
pub fn set_activation_vectors(matrices: &ClipMatrices) -> Result<LabeledMatrix> {
    let (_, first) = matrices.first().ok_or(AnalysisError::Empty { what: "clip matrices" })?;
    let k = first.data.nrows();
    let mut row_labels = Vec::with_capacity(k * k.saturating_sub(1) / 2);
    for i in 0..k {
        for j in i + 1..k {
            row_labels.push(format!("{}-{}", first.row_labels[i], first.row_labels[j]));
        }
    }
    let mut columns = Vec::with_capacity(matrices.len());
    for (key, m) in matrices {
        if m.data.dim() != (k, k) {
            return Err(AnalysisError::shape("set_activation_vectors", format!("{k}x{k}"),
                format!("{}x{} for {key}", m.data.nrows(), m.data.ncols())));
        }
        let v: Array1<f64> = (0..k)
            .flat_map(|i| (i + 1..k).map(move |j| (i, j)))
            .map(|(i, j)| m.data[[i, j]])
            .collect();
        columns.push((key.clone(), v));
    }
    LabeledMatrix::from_columns(row_labels, columns)
}

/// Join two tables column-wise on their shared row axis and correlate the
/// joined columns.  Output is `(cols(a) + cols(b))²`.
pub fn join_and_correlate(clip_table: &LabeledMatrix, rest_table: &LabeledMatrix) -> Result<LabeledMatrix> {
    if clip_table.row_labels != rest_table.row_labels {
        return Err(AnalysisError::shape(
            "join_and_correlate rows",
            clip_table.row_labels.len(),
            rest_table.row_labels.len(),
        ));
    }
    let joined: Array2<f64> = concatenate(Axis(1), &[clip_table.data.view(), rest_table.data.view()])
        .map_err(|e| AnalysisError::shape("join_and_correlate", "equal row counts", e))?;
    let labels: Vec<String> = clip_table
        .col_labels
        .iter()
        .chain(&rest_table.col_labels)
        .cloned()
        .collect();
    LabeledMatrix::square(labels, correlation_matrix(&joined))
}

/// Reorder `axis` by `order`, which must be a permutation of `0..len`.
pub fn permute(matrix: &LabeledMatrix, axis: MatrixAxis, order: &[usize]) -> Result<LabeledMatrix> {
    let n = matrix.labels(axis).len();
    let mut seen = vec![false; n];
    if order.len() != n || !order.iter().all(|&i| i < n && !std::mem::replace(&mut seen[i], true)) {
        return Err(AnalysisError::shape("permute", format!("permutation of 0..{n}"), format!("{order:?}")));
    }
    Ok(matrix.select(axis, order))
}

/// The order that undoes `order`.
pub fn invert_permutation(order: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; order.len()];
    for (pos, &i) in order.iter().enumerate() {
        inv[i] = pos;
    }
    inv
}

/// Canonical display order of clip-keyed labels: grouped by mode, then by
/// clip catalogue index.  Labels that name no known clip keep their
/// relative order at the end.  Test-retest entries are dropped unless
/// `include_test_retest`.
pub fn canonical_order(labels: &[String], include_test_retest: bool) -> Vec<usize> {
    let key = |pos: usize| {
        let label = labels[pos].as_str();
        let (clip, mode_rank) = match split_clip_key(label) {
            Some((clip, mode)) => (clip, mode as usize),
            None => (label, 0),
        };
        match clip_index(clip) {
            Some(ci) => (0, mode_rank, ci, pos),
            None => (1, 0, 0, pos),
        }
    };
    let mut order: Vec<usize> = (0..labels.len())
        .filter(|&i| include_test_retest || !labels[i].starts_with(TEST_RETEST))
        .collect();
    order.sort_by_key(|&i| key(i));
    order
}

/// Put rows or columns of a clip-keyed table into canonical order.
pub fn rearrange(matrix: &LabeledMatrix, axis: MatrixAxis, include_test_retest: bool) -> LabeledMatrix {
    matrix.select(axis, &canonical_order(matrix.labels(axis), include_test_retest))
}

/// For every clip present as both `{clip}_clips` (row) and
/// `{clip}_rest_between` (column), the correlation between the two.
pub fn clip_rest_correlation(matrix: &LabeledMatrix) -> Result<LabeledMatrix> {
    let mut clips = Vec::new();
    let mut values = Vec::new();
    for row in &matrix.row_labels {
        let Some((clip, Mode::Clips)) = split_clip_key(row) else { continue };
        if let Some(v) = matrix.get(row, &clip_key(clip, Mode::RestBetween)) {
            clips.push(clip.to_string());
            values.push(v);
        }
    }
    if clips.is_empty() {
        return Err(AnalysisError::Empty { what: "clip/rest pairs" });
    }
    LabeledMatrix::from_columns(clips, vec![("clip_rest_corr".to_string(), Array1::from(values))])
}

/// Correlation jobs over a set of subjects.
#[derive(Debug, Clone)]
pub struct CorrelationPipeline {
    pub config: CorrelationConfig,
    pub store: SubjectStore,
}

impl CorrelationPipeline {
    pub fn new(config: CorrelationConfig, store: SubjectStore) -> Self {
        Self { config, store }
    }

    fn window_for(&self, mode: Mode) -> Option<WindowSpec> {
        match mode {
            Mode::Clips => Some(self.config.clip_window),
            Mode::RestBetween | Mode::RestBefore => self.config.rest_window,
        }
    }

    /// Correlation matrix of every clip of `subject` under `mode`.
    pub fn auto_correlate_subject(&self, subject: &str, mode: Mode) -> anyhow::Result<ClipMatrices> {
        let table = self.store.load(subject, mode)?;
        auto_correlate_table(&table, mode, self.window_for(mode).as_ref())
            .with_context(|| format!("subject {subject} ({mode})"))
    }

    /// Windowed clip matrices joined with rest matrices, one CSV per subject.
    pub fn compare_window_to_rest<S: AsRef<str>>(&self, subjects: &[S]) -> PipelineReport<PathBuf> {
        let mut report = PipelineReport::default();
        for subject in subjects {
            let subject = subject.as_ref();
            let outcome = self.window_to_rest_one(subject);
            if let Ok(path) = &outcome {
                info!(subject, path = %path.display(), "saved clip/rest correlation");
            }
            report.record(subject, outcome);
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            partial = report.is_partial(),
            "window-to-rest comparison finished"
        );
        report
    }

    fn window_to_rest_one(&self, subject: &str) -> anyhow::Result<PathBuf> {
        let clips = set_activation_vectors(&self.auto_correlate_subject(subject, Mode::Clips)?)?;
        let rest = set_activation_vectors(&self.auto_correlate_subject(subject, Mode::RestBetween)?)?;
        let joined = join_and_correlate(&clips, &rest)?;
        let path = self
            .store
            .output_path(subject, &format!("corr_mat_{}", self.config.clip_window));
        joined.write_csv(&path)?;
        Ok(path)
    }

    /// Average of each subject's activation vector at `clip`'s last TR.
    /// Subjects that fail are logged, left out of the average and listed in
    /// [`Partial::skipped`].
    pub fn avg_single_tick<S: AsRef<str>>(
        &self,
        subjects: &[S],
        mode: Mode,
        clip: &str,
    ) -> anyhow::Result<Partial<Array1<f64>>> {
        Ok(self.avg_single_tick_named(subjects, mode, clip)?.map(|(_, v)| v))
    }

    fn avg_single_tick_named<S: AsRef<str>>(
        &self,
        subjects: &[S],
        mode: Mode,
        clip: &str,
    ) -> anyhow::Result<Partial<(Vec<String>, Array1<f64>)>> {
        let mut names = None;
        let mut vectors = Vec::new();
        let mut skipped = BTreeMap::new();
        for subject in subjects {
            let subject = subject.as_ref();
            let vec = self.store.load(subject, mode).and_then(|t| {
                let v = single_tick(&t, clip, None).with_context(|| format!("subject {subject}"))?;
                names.get_or_insert(t.feature_names);
                Ok(v)
            });
            match vec {
                Ok(v) => vectors.push(v),
                Err(e) => {
                    warn!(subject, clip, %mode, error = %format!("{e:#}"), "single-TR vector skipped");
                    skipped.insert(subject.to_string(), format!("{clip} ({mode}): {e:#}"));
                }
            }
        }
        let names = names.ok_or_else(|| anyhow!("no subject has clip {clip} under {mode}"))?;
        Ok(Partial { value: (names, average_matrix(vectors)?), skipped })
    }

    /// Features × `{clip}_{mode}` table of subject-averaged last-TR vectors
    /// for movie and rest-between conditions.  Clips are taken from the
    /// first subject whose movie table loads.
    pub fn compare_clip_to_rest_single_tick<S: AsRef<str>>(
        &self,
        subjects: &[S],
    ) -> anyhow::Result<Partial<LabeledMatrix>> {
        if subjects.is_empty() {
            return Err(AnalysisError::Empty { what: "subjects" }.into());
        }
        let clips = subjects
            .iter()
            .find_map(|s| self.store.load(s.as_ref(), Mode::Clips).ok())
            .ok_or_else(|| anyhow!("no subject has a readable {} table", Mode::Clips))?
            .clips();
        let mut row_labels = None;
        let mut columns = Vec::new();
        let mut skipped = BTreeMap::new();
        for clip in &clips {
            for mode in [Mode::Clips, Mode::RestBetween] {
                let avg = self.avg_single_tick_named(subjects, mode, clip)?;
                for (subject, err) in avg.skipped {
                    skipped.entry(subject).or_insert(err);
                }
                let (names, v) = avg.value;
                row_labels.get_or_insert(names);
                columns.push((clip_key(clip, mode), v));
            }
        }
        let row_labels = row_labels.ok_or(AnalysisError::Empty { what: "clips" })?;
        Ok(Partial { value: LabeledMatrix::from_columns(row_labels, columns)?, skipped })
    }

    /// Z-scored, correlated and rearranged single-TR clip/rest table.
    pub fn single_tick_correlation<S: AsRef<str>>(&self, subjects: &[S]) -> anyhow::Result<Partial<LabeledMatrix>> {
        let Partial { value: table, skipped } = self.compare_clip_to_rest_single_tick(subjects)?;
        let z = zscore_columns(&table.data, &table.col_labels)?;
        let corr = LabeledMatrix::square(table.col_labels.clone(), correlation_matrix(&z))?;
        let corr = rearrange(&corr, MatrixAxis::Rows, self.config.include_test_retest);
        let corr = rearrange(&corr, MatrixAxis::Columns, self.config.include_test_retest);
        Ok(Partial { value: corr, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn canonical_order_groups_by_mode_then_clip() {
        let l = labels(&["pockets_rest_between", "twomen_clips", "testretest_clips", "pockets_clips", "misc"]);
        assert_eq!(canonical_order(&l, true), vec![2, 1, 3, 0, 4]);
        assert_eq!(canonical_order(&l, false), vec![1, 3, 0, 4]);
    }

    #[test]
    fn permute_rejects_duplicates() {
        let m = LabeledMatrix::square(labels(&["a", "b"]), array![[1.0, 0.0], [0.0, 1.0]]).unwrap();
        assert!(permute(&m, MatrixAxis::Rows, &[0, 0]).is_err());
        assert!(permute(&m, MatrixAxis::Rows, &[1]).is_err());
    }

    #[test]
    fn activation_vectors_take_upper_triangle() {
        let m = LabeledMatrix::square(
            labels(&["x", "y", "z"]),
            array![[1.0, 0.1, 0.2], [0.1, 1.0, 0.3], [0.2, 0.3, 1.0]],
        )
        .unwrap();
        let v = set_activation_vectors(&vec![("oceans_clips".into(), m)]).unwrap();
        assert_eq!(v.row_labels, labels(&["x-y", "x-z", "y-z"]));
        assert_eq!(v.data.column(0).to_vec(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn clip_rest_pairs_diagonal() {
        let l = labels(&["oceans_clips", "oceans_rest_between"]);
        let m = LabeledMatrix::square(l, array![[1.0, 0.4], [0.4, 1.0]]).unwrap();
        let r = clip_rest_correlation(&m).unwrap();
        assert_eq!(r.row_labels, labels(&["oceans"]));
        assert_eq!(r.data[[0, 0]], 0.4);
    }
}
