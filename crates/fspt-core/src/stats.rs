//! Post-fit tree statistics.
//!
//! One walk over the tree summarising its shape: leaf populations,
//! depths and scores, per-feature split placement, and the volume and
//! sample mass sitting above caller-chosen score thresholds.

use std::fmt;

use fspt_num::stats::{first_quartile, median, third_quartile};

use crate::node::NodeKind;
use crate::tree::Fspt;

/// Five-number-ish summary of one quantity over the leaves.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistributionSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub first_quartile: f64,
    pub third_quartile: f64,
}

impl DistributionSummary {
    fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).expect("statistics are finite"));
        let n = values.len() as f64;
        Self {
            min: values[0],
            max: *values.last().expect("non-empty"),
            mean: values.iter().sum::<f64>() / n,
            median: median(&values, |v| *v),
            first_quartile: first_quartile(&values, |v| *v),
            third_quartile: third_quartile(&values, |v| *v),
        }
    }
}

/// Where the tree splits one feature.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureSplitStats {
    pub count: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
}

/// Leaf mass above one score threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreThresholdStats {
    pub threshold: f32,
    /// Total volume of leaves scoring at least the threshold.
    pub volume: f64,
    /// Same, as a fraction of the root volume.
    pub volume_p: f64,
    pub n_samples: usize,
    pub n_samples_p: f64,
}

/// Shape report of a fitted tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeStats {
    pub n_nodes: usize,
    pub n_leaves: usize,
    pub n_inner: usize,
    pub depth: usize,
    pub n_samples: usize,
    pub volume: f64,
    /// 1 for a perfectly balanced tree, towards 0 for a path.
    pub balance_index: f64,
    pub samples_per_leaf: DistributionSummary,
    pub leaf_depth: DistributionSummary,
    pub leaf_score: DistributionSummary,
    pub splits_by_feature: Vec<FeatureSplitStats>,
    pub above_threshold: Vec<ScoreThresholdStats>,
}

/// Total volume of the leaves scoring at least `threshold`.
pub fn volume_above(fspt: &Fspt, threshold: f32) -> f64 {
    fspt.leaves()
        .into_iter()
        .map(|id| fspt.node(id))
        .filter(|node| node.score() >= threshold)
        .map(|node| node.volume)
        .sum()
}

/// Summarises a fitted tree; `thresholds` selects the score levels the
/// mass report is computed at.
pub fn tree_stats(fspt: &Fspt, thresholds: &[f32]) -> TreeStats {
    let leaves = fspt.leaves();
    let n_nodes = fspt.n_nodes();
    let n_leaves = leaves.len();

    let samples_per_leaf = DistributionSummary::from_values(
        leaves.iter().map(|&id| fspt.node(id).n_samples as f64).collect(),
    );
    let leaf_depth = DistributionSummary::from_values(
        leaves.iter().map(|&id| fspt.node(id).depth as f64).collect(),
    );
    let leaf_score = DistributionSummary::from_values(
        leaves.iter().map(|&id| fspt.node(id).score() as f64).collect(),
    );

    let mut split_values: Vec<Vec<f32>> = vec![Vec::new(); fspt.n_features()];
    for id in fspt.preorder() {
        if let NodeKind::Inner {
            split_feature,
            split_value,
            ..
        } = fspt.node(id).kind
        {
            split_values[split_feature].push(split_value);
        }
    }
    let splits_by_feature = split_values
        .into_iter()
        .map(|mut values| {
            if values.is_empty() {
                return FeatureSplitStats::default();
            }
            values.sort_by(f32::total_cmp);
            FeatureSplitStats {
                count: values.len(),
                min: values[0],
                max: *values.last().expect("non-empty"),
                mean: values.iter().sum::<f32>() / values.len() as f32,
                median: median(&values, |v| *v as f64) as f32,
            }
        })
        .collect();

    let above_threshold = thresholds
        .iter()
        .map(|&threshold| {
            let mut volume = 0.0;
            let mut n_samples = 0;
            for &id in &leaves {
                let node = fspt.node(id);
                if node.score() >= threshold {
                    volume += node.volume;
                    n_samples += node.n_samples;
                }
            }
            ScoreThresholdStats {
                threshold,
                volume,
                volume_p: volume / fspt.volume(),
                n_samples,
                n_samples_p: if fspt.n_samples() > 0 {
                    n_samples as f64 / fspt.n_samples() as f64
                } else {
                    0.0
                },
            }
        })
        .collect();

    let balance_index =
        (1.0 - (2.0 * fspt.depth() as f64 - 1.0) / n_nodes as f64).clamp(0.0, 1.0);

    TreeStats {
        n_nodes,
        n_leaves,
        n_inner: n_nodes - n_leaves,
        depth: fspt.depth(),
        n_samples: fspt.n_samples(),
        volume: fspt.volume(),
        balance_index,
        samples_per_leaf,
        leaf_depth,
        leaf_score,
        splits_by_feature,
        above_threshold,
    }
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "tree: {} nodes ({} leaves, {} inner), depth {}, {} samples",
            self.n_nodes, self.n_leaves, self.n_inner, self.depth, self.n_samples
        )?;
        writeln!(f, "  volume {:.6}, balance {:.3}", self.volume, self.balance_index)?;
        writeln!(
            f,
            "  samples/leaf: median {:.1} (q1 {:.1}, q3 {:.1}, max {:.0})",
            self.samples_per_leaf.median,
            self.samples_per_leaf.first_quartile,
            self.samples_per_leaf.third_quartile,
            self.samples_per_leaf.max
        )?;
        write!(
            f,
            "  score: median {:.3} (min {:.3}, max {:.3})",
            self.leaf_score.median, self.leaf_score.min, self.leaf_score.max
        )
    }
}
