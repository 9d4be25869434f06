//! Fixed-length TR windows cut from one clip's activation table.
//!
//! A window is the half-open row range between the rows holding the
//! `start` and `stop` TRs.  Both TRs must exist: a clip shorter than the
//! requested window is an error, never a silently shorter matrix.
use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::table::ActivationTable;

/// How to place a window within a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    /// `length` TRs ending at the clip's last TR: `[max − length, max)`.
    Last(usize),
    /// `length` TRs from the clip's first TR: `[min, min + length)`.
    First(usize),
    /// Explicit `[start, stop)` TRs.
    Custom { start: i64, stop: i64 },
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec::Last(19)
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Last(n) => write!(f, "last_{n}_tr"),
            WindowSpec::First(n) => write!(f, "first_{n}_tr"),
            WindowSpec::Custom { start, stop } => write!(f, "tr_{start}_{stop}"),
        }
    }
}

impl WindowSpec {
    /// Resolve to absolute `(start, stop)` TRs for a clip with the given ticks.
    pub fn bounds(&self, ticks: &[i64]) -> Result<(i64, i64)> {
        let (start, stop) = match *self {
            WindowSpec::Last(len) => {
                let stop = *ticks.iter().max().ok_or(AnalysisError::Empty { what: "clip ticks" })?;
                (stop - len as i64, stop)
            }
            WindowSpec::First(len) => {
                let start = *ticks.iter().min().ok_or(AnalysisError::Empty { what: "clip ticks" })?;
                (start, start + len as i64)
            }
            WindowSpec::Custom { start, stop } => (start, stop),
        };
        if stop <= start {
            return Err(AnalysisError::InvalidWindow { start, stop });
        }
        Ok((start, stop))
    }
}

/// Extract the feature rows of `clip_table` inside `spec`.
///
/// `clip_table` holds one clip (see [`ActivationTable::clip_rows`]).  The
/// result has `stop − start` rows for a contiguous clip and only feature
/// columns; label and tick are dropped.
pub fn extract_window(clip_table: &ActivationTable, spec: &WindowSpec) -> Result<Array2<f64>> {
    let (start, stop) = spec.bounds(&clip_table.ticks)?;
    let row_of = |tick: i64| {
        clip_table
            .ticks
            .iter()
            .position(|&t| t == tick)
            .ok_or_else(|| AnalysisError::MissingIndex {
                clip: clip_table.labels.first().cloned().unwrap_or_default(),
                tick,
            })
    };
    let start_row = row_of(start)?;
    let stop_row = row_of(stop)?;
    if stop_row <= start_row {
        return Err(AnalysisError::InvalidWindow { start, stop });
    }
    Ok(clip_table
        .features
        .slice(ndarray::s![start_row..stop_row, ..])
        .to_owned())
}

/// Activation vector of `clip` at a single TR; `None` picks the clip's last TR.
pub fn single_tick(table: &ActivationTable, clip: &str, tick: Option<i64>) -> Result<Array1<f64>> {
    let clip_table = table.clip_rows(clip);
    let tick = match tick {
        Some(t) => t,
        None => *clip_table
            .ticks
            .iter()
            .max()
            .ok_or_else(|| AnalysisError::MissingIndex { clip: clip.to_string(), tick: -1 })?,
    };
    let row = clip_table
        .ticks
        .iter()
        .position(|&t| t == tick)
        .ok_or_else(|| AnalysisError::MissingIndex { clip: clip.to_string(), tick })?;
    Ok(clip_table.features.row(row).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(n: usize, first_tick: i64) -> ActivationTable {
        ActivationTable::new(
            vec!["oceans".into(); n],
            (0..n as i64).map(|t| t + first_tick).collect(),
            Array2::from_shape_fn((n, 3), |(r, c)| (r * 10 + c) as f64),
            vec!["a".into(), "b".into(), "c".into()],
        )
        .unwrap()
    }

    #[test]
    fn last_window_ends_before_final_tick() {
        let w = extract_window(&clip(30, 0), &WindowSpec::Last(19)).unwrap();
        assert_eq!(w.dim(), (19, 3));
        // start = 29 − 19 = 10
        assert_eq!(w[[0, 0]], 100.0);
    }

    #[test]
    fn first_window_from_onset() {
        let w = extract_window(&clip(30, 5), &WindowSpec::First(4)).unwrap();
        assert_eq!(w.dim(), (4, 3));
        assert_eq!(w[[0, 1]], 1.0);
    }

    #[test]
    fn short_clip_is_missing_index() {
        let err = extract_window(&clip(10, 0), &WindowSpec::First(19)).unwrap_err();
        assert_eq!(err, AnalysisError::MissingIndex { clip: "oceans".into(), tick: 19 });
    }

    #[test]
    fn custom_window_rejects_inverted_bounds() {
        let err = extract_window(&clip(10, 0), &WindowSpec::Custom { start: 5, stop: 5 }).unwrap_err();
        assert_eq!(err, AnalysisError::InvalidWindow { start: 5, stop: 5 });
    }

    #[test]
    fn single_tick_defaults_to_last() {
        let t = clip(6, 0);
        assert_eq!(single_tick(&t, "oceans", None).unwrap().to_vec(), vec![50.0, 51.0, 52.0]);
        assert!(single_tick(&t, "oceans", Some(99)).is_err());
    }
}
