//! Experimental conditions and the movie-clip catalogue.
//!
//! Clip ordering is an explicit contract: [`CLIP_NAMES`] lists clips by
//! class id, `testretest` first, then the fourteen movie clips in the order
//! they are presented across the four 7T movie runs.  Every table and
//! matrix that is keyed by clip is sorted by this index.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Condition a recording segment was collected under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Movie watching.
    Clips,
    /// Resting TRs between consecutive clips, labelled by the preceding clip.
    RestBetween,
    /// Resting TRs before the first clip of a run.
    RestBefore,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Clips, Mode::RestBetween, Mode::RestBefore];

    /// Directory / key name used on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Clips => "clips",
            Mode::RestBetween => "rest_between",
            Mode::RestBefore => "rest_before",
        }
    }

    /// True for the resting conditions.
    pub fn is_rest(self) -> bool {
        match self {
            Mode::Clips => false,
            Mode::RestBetween | Mode::RestBefore => true,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase().replace(['-', ' '], "_");
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == norm)
            .ok_or_else(|| AnalysisError::UnknownMode(s.to_string()))
    }
}

/// Name of the calibration clip shown once per run.
pub const TEST_RETEST: &str = "testretest";

/// Clip names indexed by class id.
pub const CLIP_NAMES: [&str; 15] = [
    TEST_RETEST,
    "twomen",
    "bridgeville",
    "pockets",
    "overcome",
    "inception",
    "socialnet",
    "oceans",
    "flower",
    "hotel",
    "garden",
    "dreary",
    "homealone",
    "brokovich",
    "starwars",
];

/// Class id of a clip name, matching on prefix so `testretest3` → 0.
pub fn clip_index(name: &str) -> Option<usize> {
    let name = name.trim().to_lowercase();
    CLIP_NAMES.iter().position(|c| name.starts_with(c))
}

/// Key of a `(clip, mode)` entry in correlation tables: `{clip}_{mode}`.
pub fn clip_key(clip: &str, mode: Mode) -> String {
    format!("{clip}_{}", mode.as_str())
}

/// Inverse of [`clip_key`].  Tries the longest mode suffix first so
/// `_rest_between` is not mistaken for a clip named `..._rest`.
pub fn split_clip_key(key: &str) -> Option<(&str, Mode)> {
    let mut modes = Mode::ALL;
    modes.sort_by_key(|m| std::cmp::Reverse(m.as_str().len()));
    modes.into_iter().find_map(|m| {
        key.strip_suffix(m.as_str())
            .and_then(|rest| rest.strip_suffix('_'))
            .map(|clip| (clip, m))
    })
}

/// Assign class labels to clips listed in run order.
///
/// Every test-retest presentation maps to 0; other clips get 1, 2, … in
/// order of first appearance.
pub fn assign_clip_labels<S: AsRef<str>>(clips_in_run_order: &[S]) -> BTreeMap<String, usize> {
    let mut labels = BTreeMap::new();
    let mut next = 1;
    for clip in clips_in_run_order {
        let clip = clip.as_ref();
        if labels.contains_key(clip) {
            continue;
        }
        if clip.contains(TEST_RETEST) {
            labels.insert(clip.to_string(), 0);
        } else {
            labels.insert(clip.to_string(), next);
            next += 1;
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for m in Mode::ALL {
            assert_eq!(m.as_str().parse::<Mode>().unwrap(), m);
        }
        assert_eq!("Rest Between".parse::<Mode>().unwrap(), Mode::RestBetween);
        assert!("sleep".parse::<Mode>().is_err());
    }

    #[test]
    fn clip_key_splits_back() {
        let key = clip_key("oceans", Mode::RestBetween);
        assert_eq!(key, "oceans_rest_between");
        assert_eq!(split_clip_key(&key), Some(("oceans", Mode::RestBetween)));
        assert_eq!(split_clip_key("oceans_clips"), Some(("oceans", Mode::Clips)));
        assert_eq!(split_clip_key("oceans"), None);
    }

    #[test]
    fn testretest_prefix_maps_to_zero() {
        assert_eq!(clip_index("testretest2"), Some(0));
        assert_eq!(clip_index("starwars"), Some(14));
        assert_eq!(clip_index("unknown"), None);
    }

    #[test]
    fn labels_follow_run_order() {
        let order = ["testretest1", "twomen", "bridgeville", "testretest2", "pockets"];
        let labels = assign_clip_labels(&order);
        assert_eq!(labels["testretest1"], 0);
        assert_eq!(labels["testretest2"], 0);
        assert_eq!(labels["twomen"], 1);
        assert_eq!(labels["bridgeville"], 2);
        assert_eq!(labels["pockets"], 3);
    }
}
