//! # cliprest: clip classification and clip / rest correlation of fMRI activations
//!
//! `cliprest` asks whether a temporal classifier that recognises which movie
//! clip a subject is watching learns representations resembling the brain's
//! own activity at rest.  Two independent pipelines share one table model:
//!
//! ```text
//! per-subject activation_matrix.csv  (clips / rest_between / rest_before)
//!   │
//!   ├─ window::extract_window        first-N / last-N / custom TR window
//!   ├─ matrix::zscore_columns        per-feature z-score (ddof = 1)
//!   ├─ matrix::correlation_matrix    feature × feature Pearson
//!   └─ correlation::join_and_correlate
//!        │
//!        └─→ <subject>/corr_mat_<window>.csv
//!
//! all-subject activation table
//!   │
//!   ├─ sequence::build_sequences     padded [N, T, F] batches, PAD_LABEL = −100
//!   ├─ train::TrainEvalLoop          LSTM + Adam, masked cross-entropy
//!   └─ score::masked_accuracy        per subject group / per TR / confusion
//!        │
//!        └─→ ResultsBundle  ("<label> <mode> results.json")
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use cliprest::{ActivationTable, TrainConfig, TrainEvalLoop};
//! use std::path::Path;
//!
//! let table = ActivationTable::load_csv(Path::new("data/all_subjects.csv")).unwrap();
//! let cfg = TrainConfig { num_epochs: 5, ..TrainConfig::default() };
//! let run = TrainEvalLoop::new(cfg).run(&table).unwrap();
//! println!("mean test accuracy {:.3}", run.results.mean_test_accuracy());
//! ```
//!
//! Correlation jobs work from a directory of subjects:
//!
//! ```no_run
//! use cliprest::{CorrelationConfig, CorrelationPipeline, SubjectStore};
//!
//! let pipeline = CorrelationPipeline::new(CorrelationConfig::default(), SubjectStore::new("data/subjects"));
//! let report = pipeline.compare_window_to_rest(&["sub-01", "sub-02"]);
//! assert!(!report.is_partial());
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod io;
pub mod matrix;
pub mod mode;
pub mod model;
pub mod results;
pub mod score;
pub mod sequence;
pub mod table;
pub mod train;
pub mod window;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config / errors
pub use config::{CorrelationConfig, TrainConfig};
pub use error::{AnalysisError, Result};

// tables and labels
pub use mode::{assign_clip_labels, clip_index, clip_key, split_clip_key, Mode, CLIP_NAMES, TEST_RETEST};
pub use table::{ActivationTable, LabeledMatrix, MatrixAxis};

// correlation side
pub use correlation::{
    auto_correlate_table, canonical_order, clip_rest_correlation, invert_permutation,
    join_and_correlate, permute, rearrange, set_activation_vectors,
    ClipMatrices, CorrelationPipeline, Partial, PipelineReport, SubjectStore,
};
pub use matrix::{average_matrix, correlation_matrix, z_score, zscore_columns};
pub use window::{extract_window, single_tick, WindowSpec};

// classifier side
pub use model::{ActivationRecorder, Adam, LstmClassifier, SequenceClassifier};
pub use results::{ResultsBundle, ResultsRecord};
pub use score::{masked_accuracy, Scores};
pub use sequence::{build_sequences, clip_time_lengths, time_window, PaddedSequenceBatch, PAD_LABEL};
pub use train::{results_path, split_subjects, RecordedActivations, TrainEvalLoop, TrainRun};

// persistence
pub use io::{load_f32_tensors, load_results, save_results, StWriter};
