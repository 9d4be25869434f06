//! Analysis configuration.
//!
//! [`CorrelationConfig`] drives the windowed correlation jobs and
//! [`TrainConfig`] the clip classifier run.  All fields have defaults that
//! match the published analysis settings.
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::window::WindowSpec;

/// Configuration for the clip / rest correlation pipeline.
///
/// All fields are `pub`, so override with struct-update syntax:
///
/// ```
/// use cliprest::{CorrelationConfig, WindowSpec};
///
/// let cfg = CorrelationConfig {
///     clip_window: WindowSpec::Last(10),
///     ..CorrelationConfig::default()
/// };
/// assert!(!cfg.include_test_retest);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Window cut from every movie clip before correlating.
    ///
    /// Default: first 19 TRs of the clip.
    pub clip_window: WindowSpec,

    /// Window cut from every rest segment; `None` uses the whole segment.
    ///
    /// Default: `None`.
    pub rest_window: Option<WindowSpec>,

    /// Keep the test-retest calibration clip in rearranged tables.
    ///
    /// Default: `false`.
    pub include_test_retest: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            clip_window: WindowSpec::First(19),
            rest_window: None,
            include_test_retest: false,
        }
    }
}

/// Configuration for one train / evaluate run of the clip classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of subjects (in sorted id order) used for training; the rest
    /// are held out for testing.
    ///
    /// Default: `100`.
    pub train_size: usize,

    /// LSTM hidden units per layer.  Default: `150`.
    pub k_hidden: usize,

    /// Stacked LSTM layers.  Default: `1`.
    pub k_layers: usize,

    /// Number of clip classes, test-retest included.  Default: `15`.
    pub k_class: usize,

    /// Sequences per mini-batch; the last batch of an epoch may be short.
    ///
    /// Default: `16`.
    pub batch_size: usize,

    /// Passes over the training set.  No early stopping.  Default: `50`.
    pub num_epochs: usize,

    /// Adam step size.  Default: `1e-3`.
    pub learning_rate: f32,

    /// Seed for weight init and batch permutation.  Default: `330`.
    pub seed: u64,

    /// TRs kept from every clip before building sequences, re-based to 0.
    /// `None` keeps whole clips.
    ///
    /// Default: `Some(0..10)`.
    pub time_window: Option<Range<i64>>,

    /// Draw a fresh batch permutation every epoch instead of once per run.
    ///
    /// Default: `false`.
    pub reshuffle_each_epoch: bool,

    /// Record and persist hidden/linear activations on the test set.
    ///
    /// Default: `false`.
    pub save_activations: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_size: 100,
            k_hidden: 150,
            k_layers: 1,
            k_class: 15,
            batch_size: 16,
            num_epochs: 50,
            learning_rate: 1e-3,
            seed: 330,
            time_window: Some(0..10),
            reshuffle_each_epoch: false,
            save_activations: false,
        }
    }
}
