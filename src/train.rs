//! Train / evaluate loop for the clip classifier.
//!
//! ```text
//! ActivationTable (all subjects)
//!   │
//!   ├─ time_window            keep TRs in cfg.time_window, re-based to 0
//!   ├─ split_subjects         first train_size sorted ids → train, rest → test
//!   ├─ clip_time_lengths      TRs per class
//!   ├─ build_sequences        padded [N, T, F] batches, T = max over both splits
//!   ├─ train                  num_epochs × mini-batches of a seeded permutation
//!   └─ masked_accuracy        test subjects, then train subjects
//!        │
//!        └─→ ResultsBundle
//! ```
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::io::StWriter;
use crate::mode::Mode;
use crate::model::{ActivationRecorder, Adam, LstmClassifier};
use crate::results::{rows_of, rows_of_u64, ResultsBundle, ResultsRecord};
use crate::score::{masked_accuracy, Scores};
use crate::sequence::{build_sequences, clip_time_lengths, time_window, PaddedSequenceBatch};
use crate::table::ActivationTable;

/// Hidden and read-out activations of the test set, with the labels needed
/// to interpret them.
#[derive(Debug, Clone)]
pub struct RecordedActivations {
    pub recorder: ActivationRecorder,
    /// `[N, T]` labels of the recorded batch (padding = `PAD_LABEL`).
    pub labels: Array2<i64>,
    pub lengths: Vec<usize>,
}

impl RecordedActivations {
    /// Write `lstm`, `linear`, `labels` and `lengths` tensors to a
    /// safetensors file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        if let Some(lstm) = &self.recorder.lstm {
            w.add_array("lstm", lstm);
        }
        if let Some(linear) = &self.recorder.linear {
            w.add_array("linear", linear);
        }
        let labels: Vec<i32> = self.labels.iter().map(|&y| y as i32).collect();
        w.add_i32("labels", &labels, self.labels.shape());
        let lengths: Vec<i32> = self.lengths.iter().map(|&l| l as i32).collect();
        w.add_i32("lengths", &lengths, &[lengths.len()]);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        w.write(path)
    }
}

/// Everything a finished run produces.
#[derive(Debug, Clone)]
pub struct TrainRun {
    /// Trained weights, frozen.
    pub model: LstmClassifier,
    pub results: ResultsBundle,
    /// Number of Adam updates applied.
    pub optimizer_steps: u64,
    pub train_subjects: Vec<String>,
    pub test_subjects: Vec<String>,
    /// Present when `save_activations` was set.
    pub activations: Option<RecordedActivations>,
}

impl TrainRun {
    pub fn record(&self, mode: Mode) -> ResultsRecord {
        ResultsRecord { mode, test_mode: self.results.clone() }
    }
}

/// `<dir>/<label> <mode> results.json`
pub fn results_path(dir: &Path, label: &str, mode: Mode) -> PathBuf {
    dir.join(format!("{label} {mode} results.json"))
}

/// First `train_size` ids go to training, the remainder to testing.
///
/// Both halves must be non-empty.
pub fn split_subjects(subject_ids: &[String], train_size: usize) -> Result<(Vec<String>, Vec<String>)> {
    if train_size == 0 || train_size >= subject_ids.len() {
        bail!(
            "train_size {train_size} leaves no {} subjects out of {}",
            if train_size == 0 { "training" } else { "test" },
            subject_ids.len()
        );
    }
    let (train, test) = subject_ids.split_at(train_size);
    Ok((train.to_vec(), test.to_vec()))
}

/// Drives one train / evaluate run.
#[derive(Debug, Clone, Default)]
pub struct TrainEvalLoop {
    config: TrainConfig,
}

impl TrainEvalLoop {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Train a fresh classifier on `table` and score it.
    ///
    /// Any failure aborts the run; no partial results are returned.
    pub fn run(&self, table: &ActivationTable) -> Result<TrainRun> {
        let cfg = &self.config;
        for (field, value) in [
            ("batch_size", cfg.batch_size),
            ("k_hidden", cfg.k_hidden),
            ("k_layers", cfg.k_layers),
            ("k_class", cfg.k_class),
        ] {
            if value == 0 {
                bail!("{field} must be at least 1");
            }
        }
        info!(device = "cpu", seed = cfg.seed, "starting clip classifier run");

        // ── split / prep ──────────────────────────────────────────────────
        let table = match &cfg.time_window {
            Some(range) => time_window(table, range),
            None => table.clone(),
        };
        if table.is_empty() {
            bail!("no rows left after time window {:?}", cfg.time_window);
        }
        let (train_ids, test_ids) = split_subjects(&table.subject_ids(), cfg.train_size)?;
        info!(train = train_ids.len(), test = test_ids.len(), "split subjects");

        let clip_time = clip_time_lengths(&table, cfg.k_class).context("computing clip lengths")?;
        let (train_b, test_b, max_length) = padded_pair(&table, &train_ids, &test_ids)?;
        debug!(
            train_sequences = train_b.n_sequences(),
            test_sequences = test_b.n_sequences(),
            max_length,
            "built padded batches"
        );

        // ── train ─────────────────────────────────────────────────────────
        let mut model = LstmClassifier::new(table.n_features(), cfg.k_hidden, cfg.k_layers, cfg.k_class, cfg.seed)
            .context("building classifier")?;
        let mut adam = Adam::new(&model, cfg.learning_rate);
        let mut rng = ChaCha20Rng::seed_from_u64(cfg.seed);
        let mut order: Vec<usize> = (0..train_b.n_sequences()).collect();
        order.shuffle(&mut rng);

        let mut losses = Vec::with_capacity(cfg.num_epochs);
        for epoch in 0..cfg.num_epochs {
            if cfg.reshuffle_each_epoch && epoch > 0 {
                order.shuffle(&mut rng);
            }
            let mut total = 0.0f64;
            let mut n_batches = 0usize;
            for (b, chunk) in order.chunks(cfg.batch_size).enumerate() {
                let batch = train_b.select(chunk);
                let (loss, grads) = model
                    .loss_and_gradients(&batch, max_length)
                    .with_context(|| format!("epoch {epoch}, batch {b}: forward/backward"))?;
                if !loss.is_finite() {
                    bail!("epoch {epoch}, batch {b}: non-finite loss {loss}");
                }
                adam.step(&mut model, &grads)
                    .with_context(|| format!("epoch {epoch}, batch {b}: optimizer step"))?;
                total += loss as f64;
                n_batches += 1;
            }
            let mean = if n_batches == 0 { f64::NAN } else { total / n_batches as f64 };
            info!(epoch, loss = mean, "epoch finished");
            losses.push(mean);
        }

        // ── evaluate ──────────────────────────────────────────────────────
        let test_scores = masked_accuracy(&model, &test_b, max_length, &clip_time, test_ids.len())
            .context("scoring test subjects")?;
        let train_scores = masked_accuracy(&model, &train_b, max_length, &clip_time, train_ids.len())
            .context("scoring training subjects")?;
        info!(
            test_accuracy = test_scores.mean_accuracy(),
            train_accuracy = train_scores.mean_accuracy(),
            "evaluation finished"
        );

        let activations = if cfg.save_activations {
            let mut recorder = ActivationRecorder::default();
            model
                .forward_recorded(&test_b.features, &test_b.lengths, max_length, &mut recorder)
                .context("recording test activations")?;
            Some(RecordedActivations { recorder, labels: test_b.labels.clone(), lengths: test_b.lengths.clone() })
        } else {
            None
        };

        let results = bundle(&train_scores, &test_scores, test_ids.len(), losses, clip_time);
        Ok(TrainRun {
            model,
            results,
            optimizer_steps: adam.steps(),
            train_subjects: train_ids,
            test_subjects: test_ids,
            activations,
        })
    }
}

/// Train and test batches padded to a common width.
fn padded_pair(
    table: &ActivationTable,
    train_ids: &[String],
    test_ids: &[String],
) -> Result<(PaddedSequenceBatch, PaddedSequenceBatch, usize)> {
    let train = build_sequences(table, train_ids, None).context("building training sequences")?;
    let test = build_sequences(table, test_ids, None).context("building test sequences")?;
    let max_length = train.max_length().max(test.max_length());
    let train = build_sequences(table, train_ids, Some(max_length))?;
    let test = build_sequences(table, test_ids, Some(max_length))?;
    Ok((train, test, max_length))
}

fn bundle(train: &Scores, test: &Scores, n_test: usize, losses: Vec<f64>, clip_time: Vec<usize>) -> ResultsBundle {
    ResultsBundle {
        train: train.group_accuracy.to_vec(),
        val: vec![0.0; n_test],
        test: test.group_accuracy.to_vec(),
        t_train: train.time_accuracy.iter().map(|(&c, a)| (c, rows_of(a))).collect(),
        t_test: test.time_accuracy.iter().map(|(&c, a)| (c, rows_of(a))).collect(),
        test_conf_mtx: rows_of_u64(&test.confusion),
        losses,
        clip_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i:02}")).collect()
    }

    #[test]
    fn split_takes_prefix() {
        let (train, test) = split_subjects(&ids(5), 3).unwrap();
        assert_eq!(train, vec!["s00", "s01", "s02"]);
        assert_eq!(test, vec!["s03", "s04"]);
    }

    #[test]
    fn split_rejects_empty_half() {
        assert!(split_subjects(&ids(3), 0).is_err());
        assert!(split_subjects(&ids(3), 3).is_err());
    }

    #[test]
    fn results_file_name() {
        let p = results_path(Path::new("out"), "lstm_150", Mode::Clips);
        assert_eq!(p, Path::new("out").join("lstm_150 clips results.json"));
    }
}
