//! Fitting and scoring configuration.
//!
//! The historical interface threaded one mutable record through the fit
//! loop for thresholds, per-call decisions and counters alike. Here the
//! thresholds are immutable configs, decisions are the criterion's
//! return value and the counters live on the tree, written only by the
//! fit driver.

use std::fmt;

use crate::error::{Error, Result};
use crate::node::RefusalCause;

/// When the criterion runs the distance-to-boundary uniformity test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum UniformityTestLevel {
    /// Never test.
    #[default]
    None,
    /// Test only when the best gain falls below the gain threshold.
    Mixed,
    /// Test every node before searching for a split.
    Always,
}

impl UniformityTestLevel {
    pub(crate) fn to_tag(self) -> i32 {
        match self {
            UniformityTestLevel::None => 0,
            UniformityTestLevel::Mixed => 1,
            UniformityTestLevel::Always => 2,
        }
    }

    pub(crate) fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => UniformityTestLevel::None,
            1 => UniformityTestLevel::Mixed,
            2 => UniformityTestLevel::Always,
            _ => return None,
        })
    }
}

/// Thresholds steering the Gini split criterion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct GiniConfig {
    /// Hard depth cap for the tree.
    pub max_depth: usize,
    /// Minimum effective population (`n_samples + n_empty`) each side of
    /// a split must keep.
    pub min_samples: usize,
    /// Minimum child volume, as a fraction of the root volume.
    pub min_volume_p: f64,
    /// Minimum per-feature extent, as a fraction of the root extent.
    pub min_length_p: f64,
    /// Fraction of candidate split points evaluated per feature.
    pub max_tries_p: f32,
    /// Fraction of features searched per split.
    pub max_features_p: f32,
    /// Gains below this threshold count as violations.
    pub gini_gain_thresh: f64,
    /// Consecutive low-gain splits tolerated on a branch.
    pub max_consecutive_gain_violations: u32,
    /// On a low-gain split, cut the longest feature at its midpoint
    /// instead of the best histogram bin.
    pub middle_split: bool,
    /// Fan the per-feature search out on the worker pool.
    pub multi_threads: bool,
    pub uniformity_test_level: UniformityTestLevel,
    /// Significance level of the uniformity test.
    pub unf_alpha: f64,
    /// Merge equivalent sibling leaves after fitting.
    pub merge_nodes: bool,
}

impl Default for GiniConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            min_samples: 2,
            min_volume_p: 0.0,
            min_length_p: 0.0,
            max_tries_p: 1.0,
            max_features_p: 1.0,
            gini_gain_thresh: 0.01,
            max_consecutive_gain_violations: 10,
            middle_split: false,
            multi_threads: false,
            uniformity_test_level: UniformityTestLevel::None,
            unf_alpha: 0.05,
            merge_nodes: false,
        }
    }
}

impl GiniConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.min_samples == 0 {
            return Err(Error::BadArguments("min_samples must be at least 1".into()));
        }
        if self.max_depth == 0 {
            return Err(Error::BadArguments("max_depth must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.max_tries_p) || !(0.0..=1.0).contains(&self.max_features_p) {
            return Err(Error::BadArguments(
                "max_tries_p and max_features_p must lie in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_volume_p) || !(0.0..=1.0).contains(&self.min_length_p) {
            return Err(Error::BadArguments(
                "min_volume_p and min_length_p must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for GiniConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "gini criterion:")?;
        writeln!(f, "  max_depth                       {}", self.max_depth)?;
        writeln!(f, "  min_samples                     {}", self.min_samples)?;
        writeln!(f, "  min_volume_p                    {}", self.min_volume_p)?;
        writeln!(f, "  min_length_p                    {}", self.min_length_p)?;
        writeln!(f, "  max_tries_p                     {}", self.max_tries_p)?;
        writeln!(f, "  max_features_p                  {}", self.max_features_p)?;
        writeln!(f, "  gini_gain_thresh                {}", self.gini_gain_thresh)?;
        writeln!(
            f,
            "  max_consecutive_gain_violations {}",
            self.max_consecutive_gain_violations
        )?;
        writeln!(f, "  middle_split                    {}", self.middle_split)?;
        writeln!(f, "  multi_threads                   {}", self.multi_threads)?;
        writeln!(
            f,
            "  uniformity_test_level           {:?}",
            self.uniformity_test_level
        )?;
        writeln!(f, "  unf_alpha                       {}", self.unf_alpha)?;
        write!(f, "  merge_nodes                     {}", self.merge_nodes)
    }
}

/// Which leaf score the tree carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ScoreKind {
    /// Feature-importance-weighted sampling heuristic.
    Heuristic,
    /// Sample density relative to the tree density.
    #[default]
    Density,
    /// Density, rescaled around an automatically chosen threshold.
    AutoDensity,
}

impl ScoreKind {
    pub(crate) fn to_tag(self) -> i32 {
        match self {
            ScoreKind::Heuristic => 0,
            ScoreKind::Density => 1,
            ScoreKind::AutoDensity => 2,
        }
    }

    pub(crate) fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => ScoreKind::Heuristic,
            1 => ScoreKind::Density,
            2 => ScoreKind::AutoDensity,
            _ => return None,
        })
    }
}

/// Reference point for density normalisation: a leaf holding
/// `n_samples_p` of the tree's samples in `volume_p` of its volume maps
/// to `score`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Calibration {
    pub score: f64,
    pub n_samples_p: f64,
    pub volume_p: f64,
}

/// Parameters of the leaf score functions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoreConfig {
    pub kind: ScoreKind,
    /// Density only: map through `1 - (1 - cal.score)^(raw / raw_cal)`
    /// instead of scaling linearly.
    pub exponential_normalization: bool,
    /// Density only: explicit normalisation reference. Without it the
    /// densest leaf of the tree defines score 1.
    pub calibration: Option<Calibration>,
    /// Auto-density: fraction of the training mass that should sit in
    /// leaves scoring at least tau.
    pub samples_p: f64,
    /// Auto-density verification: max volume fraction of those leaves.
    pub verify_density_thresh: f64,
    /// Auto-density verification: max fraction of leaves above tau.
    pub verify_n_nodes_p_thresh: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            kind: ScoreKind::default(),
            exponential_normalization: false,
            calibration: None,
            samples_p: 0.95,
            verify_density_thresh: 0.5,
            verify_n_nodes_p_thresh: 0.5,
        }
    }
}

impl ScoreConfig {
    pub fn new(kind: ScoreKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Outcome of the scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreReport {
    /// Auto-density: the density mapped to score 0.5.
    pub tau: Option<f64>,
    /// Auto-density: whether the thresholded region also respected the
    /// volume and leaf-count bounds.
    pub verification_passed: Option<bool>,
}

/// Refusal tallies accumulated over one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct FitCounters {
    pub no_sample: u64,
    pub min_samples: u64,
    pub max_depth: u64,
    pub min_volume: u64,
    pub min_length: u64,
    pub max_count: u64,
    pub uniformity: u64,
    pub unknown: u64,
}

impl FitCounters {
    pub(crate) fn tally(&mut self, cause: RefusalCause) {
        match cause {
            RefusalCause::None => {}
            RefusalCause::NoSample => self.no_sample += 1,
            RefusalCause::MinSamples => self.min_samples += 1,
            RefusalCause::MaxDepth => self.max_depth += 1,
            RefusalCause::MinVolume => self.min_volume += 1,
            RefusalCause::MinLength => self.min_length += 1,
            RefusalCause::MaxCount => self.max_count += 1,
            RefusalCause::Uniformity => self.uniformity += 1,
            RefusalCause::Unknown => self.unknown += 1,
        }
    }

    /// Total number of refused leaves.
    pub fn total(&self) -> u64 {
        self.no_sample
            + self.min_samples
            + self.max_depth
            + self.min_volume
            + self.min_length
            + self.max_count
            + self.uniformity
            + self.unknown
    }
}

impl fmt::Display for FitCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "refusal counters:")?;
        writeln!(f, "  no_sample   {}", self.no_sample)?;
        writeln!(f, "  min_samples {}", self.min_samples)?;
        writeln!(f, "  max_depth   {}", self.max_depth)?;
        writeln!(f, "  min_volume  {}", self.min_volume)?;
        writeln!(f, "  min_length  {}", self.min_length)?;
        writeln!(f, "  max_count   {}", self.max_count)?;
        writeln!(f, "  uniformity  {}", self.uniformity)?;
        write!(f, "  unknown     {}", self.unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GiniConfig::default().validate().unwrap();
    }

    #[test]
    fn invalid_fractions_are_rejected() {
        let config = GiniConfig {
            max_tries_p: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = GiniConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn counters_tally_and_total() {
        let mut counters = FitCounters::default();
        counters.tally(RefusalCause::MinSamples);
        counters.tally(RefusalCause::MinSamples);
        counters.tally(RefusalCause::Uniformity);
        counters.tally(RefusalCause::None);
        assert_eq!(counters.min_samples, 2);
        assert_eq!(counters.uniformity, 1);
        assert_eq!(counters.total(), 3);
    }
}
