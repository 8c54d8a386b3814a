//! The feature space partitioning tree.
//!
//! Nodes are kept in an arena indexed by [`NodeId`]; the tree owns the
//! arena, the training matrix, the feature box and the importance
//! vector. After [`Fspt::fit`] returns the tree is immutable and any
//! number of threads may traverse it concurrently.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use fspt_num::sort;

use crate::config::{FitCounters, GiniConfig, ScoreConfig, ScoreReport};
use crate::criterion::{CriterionKind, Decision, GiniCriterion, SplitContext, SplitCriterion};
use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeKind, RefusalCause};
use crate::score;

/// Sibling leaves whose scores differ by no more than this merge.
pub(crate) const MERGE_SCORE_EPS: f32 = 1e-5;

pub(crate) const ROOT: NodeId = 0;

/// An axis-aligned, leaf-scored binary partition of a bounded feature
/// space.
pub struct Fspt {
    pub(crate) n_features: usize,
    pub(crate) bounds: Vec<(f32, f32)>,
    pub(crate) importance: Vec<f32>,
    pub(crate) criterion: CriterionKind,
    pub(crate) score_config: ScoreConfig,
    pub(crate) nodes: Vec<Node>,
    pub(crate) samples: Array2<f32>,
    pub(crate) volume: f64,
    pub(crate) depth: usize,
    pub(crate) n_samples: usize,
    pub(crate) min_samples: usize,
    pub(crate) fit_config: Option<GiniConfig>,
    pub(crate) counters: FitCounters,
    pub(crate) score_report: Option<ScoreReport>,
}

impl Fspt {
    /// Creates an empty tree over the box `bounds`, with one leaf (the
    /// root) covering everything.
    ///
    /// `importance` defaults to all ones; it biases the per-feature
    /// split gains.
    pub fn new(
        bounds: Vec<(f32, f32)>,
        importance: Option<Vec<f32>>,
        criterion: CriterionKind,
        score_config: ScoreConfig,
    ) -> Result<Self> {
        let n_features = bounds.len();
        if n_features == 0 {
            return Err(Error::BadArguments("feature box is empty".into()));
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
                return Err(Error::BadArguments(format!(
                    "feature {i} has a degenerate range [{lo}, {hi}]"
                )));
            }
        }
        let importance = importance.unwrap_or_else(|| vec![1.0; n_features]);
        if importance.len() != n_features {
            return Err(Error::BadArguments(format!(
                "importance has length {} for {} features",
                importance.len(),
                n_features
            )));
        }
        if importance.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(Error::BadArguments(
                "feature importance must be non-negative".into(),
            ));
        }
        let volume: f64 = bounds.iter().map(|&(lo, hi)| (hi - lo) as f64).product();
        let root = Node {
            depth: 0,
            n_samples: 0,
            n_empty: 0.0,
            volume,
            parent: None,
            cause: RefusalCause::None,
            kind: NodeKind::Leaf {
                rows: 0..0,
                score: 0.0,
                gain_violations: 0,
            },
        };
        Ok(Self {
            n_features,
            bounds,
            importance,
            criterion,
            score_config,
            nodes: vec![root],
            samples: Array2::zeros((0, n_features)),
            volume,
            depth: 0,
            n_samples: 0,
            min_samples: GiniConfig::default().min_samples,
            fit_config: None,
            counters: FitCounters::default(),
            score_report: None,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// The root box.
    pub fn bounds(&self) -> &[(f32, f32)] {
        &self.bounds
    }

    pub fn importance(&self) -> &[f32] {
        &self.importance
    }

    pub fn criterion_kind(&self) -> CriterionKind {
        self.criterion
    }

    pub fn score_config(&self) -> &ScoreConfig {
        &self.score_config
    }

    /// Volume of the root box.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// The config of the last fit, if any.
    pub fn fit_config(&self) -> Option<&GiniConfig> {
        self.fit_config.as_ref()
    }

    pub fn counters(&self) -> &FitCounters {
        &self.counters
    }

    /// Outcome of the scoring pass, if the tree has been fitted.
    pub fn score_report(&self) -> Option<&ScoreReport> {
        self.score_report.as_ref()
    }

    /// Node ids in pre-order (parent before left subtree before right).
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let NodeKind::Inner { left, right, .. } = self.nodes[id].kind {
                stack.push(right);
                stack.push(left);
            }
        }
        order
    }

    /// Ids of all leaves, in pre-order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    /// Reconstructs a node's box from the splits on its root path.
    pub fn node_bounds(&self, id: NodeId) -> Vec<(f32, f32)> {
        let mut path = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.nodes[cursor].parent {
            path.push((parent, cursor));
            cursor = parent;
        }
        let mut bounds = self.bounds.clone();
        for &(parent, child) in path.iter().rev() {
            let NodeKind::Inner {
                split_feature,
                split_value,
                left,
                ..
            } = self.nodes[parent].kind
            else {
                unreachable!("parent of a node is always inner");
            };
            if child == left {
                bounds[split_feature].1 = split_value;
            } else {
                bounds[split_feature].0 = split_value;
            }
        }
        bounds
    }

    /// Fits the partition to the rows of `x`.
    ///
    /// Replaces any previous fit. The matrix is consumed; its rows are
    /// reordered during split search and the tree keeps it as the
    /// backing store of the leaf sample views.
    pub fn fit(&mut self, x: Array2<f32>, config: &GiniConfig) -> Result<()> {
        config.validate()?;
        if x.ncols() != self.n_features {
            return Err(Error::BadArguments(format!(
                "matrix has {} columns, tree has {} features",
                x.ncols(),
                self.n_features
            )));
        }
        let x = x.as_standard_layout().into_owned();
        let n = x.nrows();

        self.samples = x;
        self.n_samples = n;
        self.min_samples = config.min_samples;
        self.counters = FitCounters::default();
        self.fit_config = Some(config.clone());
        self.score_report = None;
        self.depth = 0;
        self.nodes.clear();
        self.nodes.push(Node {
            depth: 0,
            n_samples: n,
            n_empty: n as f32,
            volume: self.volume,
            parent: None,
            cause: RefusalCause::None,
            kind: NodeKind::Leaf {
                rows: 0..n,
                score: 0.0,
                gain_violations: 0,
            },
        });

        let criterion = GiniCriterion::new(config.clone());
        let mut pending = vec![ROOT];
        while let Some(id) = pending.pop() {
            match self.evaluate_leaf(id, &criterion)? {
                Decision::Refuse(cause) => {
                    self.nodes[id].cause = cause;
                    self.counters.tally(cause);
                    debug!("leaf {id} closed: {cause:?}");
                }
                Decision::Split {
                    feature,
                    value,
                    increment_count,
                } => {
                    let (left, right) = self.split_leaf(id, feature, value, increment_count);
                    pending.push(left);
                    pending.push(right);
                }
            }
        }

        info!(
            "fitted {} nodes over {} samples, depth {}",
            self.nodes.len(),
            n,
            self.depth
        );
        score::assign_scores(self);
        if config.merge_nodes {
            self.merge_leaves();
        }
        Ok(())
    }

    fn evaluate_leaf(&mut self, id: NodeId, criterion: &GiniCriterion) -> Result<Decision> {
        let node_bounds = self.node_bounds(id);
        let d = self.n_features;
        let root_volume = self.volume;
        let Fspt {
            ref mut samples,
            ref nodes,
            ref bounds,
            ref importance,
            ..
        } = *self;
        let node = &nodes[id];
        let NodeKind::Leaf {
            ref rows,
            gain_violations,
            ..
        } = node.kind
        else {
            unreachable!("only leaves are pending");
        };
        let data = samples.as_slice_mut().expect("samples are row-major");
        let slice = &mut data[rows.start * d..rows.end * d];
        let mut ctx = SplitContext {
            samples: slice,
            n_features: d,
            bounds: &node_bounds,
            root_bounds: bounds,
            importance,
            n_empty: node.n_empty,
            volume: node.volume,
            root_volume,
            depth: node.depth,
            gain_violations,
        };
        criterion.select_split(&mut ctx)
    }

    fn split_leaf(
        &mut self,
        id: NodeId,
        feature: usize,
        value: f32,
        increment_count: bool,
    ) -> (NodeId, NodeId) {
        let d = self.n_features;
        let (lo, hi) = self.node_bounds(id)[feature];
        let (rows, parent_depth, parent_n_empty, parent_volume, parent_count) = {
            let node = &self.nodes[id];
            let NodeKind::Leaf {
                ref rows,
                gain_violations,
                ..
            } = node.kind
            else {
                unreachable!("only leaves are split");
            };
            (
                rows.clone(),
                node.depth,
                node.n_empty,
                node.volume,
                gain_violations,
            )
        };

        let data = self.samples.as_slice_mut().expect("samples are row-major");
        let slice = &mut data[rows.start * d..rows.end * d];
        let n_left = sort::partition_rows(feature, d, slice, value);

        let length = (hi - lo) as f64;
        let prop_left = (value - lo) as f64 / length;
        let prop_right = (hi - value) as f64 / length;
        let count = if increment_count { parent_count + 1 } else { 0 };

        let child = |rows: std::ops::Range<usize>, prop: f64| Node {
            depth: parent_depth + 1,
            n_samples: rows.len(),
            n_empty: parent_n_empty * prop as f32,
            volume: parent_volume * prop,
            parent: Some(id),
            cause: RefusalCause::None,
            kind: NodeKind::Leaf {
                rows,
                score: 0.0,
                gain_violations: count,
            },
        };
        let left = child(rows.start..rows.start + n_left, prop_left);
        let right = child(rows.start + n_left..rows.end, prop_right);

        let left_id = self.nodes.len();
        self.nodes.push(left);
        let right_id = self.nodes.len();
        self.nodes.push(right);
        self.nodes[id].kind = NodeKind::Inner {
            split_feature: feature,
            split_value: value,
            left: left_id,
            right: right_id,
        };
        self.depth = self.depth.max(parent_depth + 1);
        (left_id, right_id)
    }

    /// Maps each query row to the leaf containing it, or `None` for
    /// points outside the root box.
    pub fn decision(&self, x: ArrayView2<'_, f32>) -> Result<Vec<Option<NodeId>>> {
        if x.ncols() != self.n_features {
            return Err(Error::BadArguments(format!(
                "matrix has {} columns, tree has {} features",
                x.ncols(),
                self.n_features
            )));
        }
        Ok(x.rows().into_iter().map(|row| self.decide_row(row)).collect())
    }

    fn decide_row(&self, row: ArrayView1<'_, f32>) -> Option<NodeId> {
        for (value, &(lo, hi)) in row.iter().zip(&self.bounds) {
            if *value < lo || *value > hi {
                return None;
            }
        }
        let mut id = ROOT;
        loop {
            match self.nodes[id].kind {
                NodeKind::Leaf { .. } => return Some(id),
                NodeKind::Inner {
                    split_feature,
                    split_value,
                    left,
                    right,
                } => {
                    id = if row[split_feature] <= split_value {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Scores each query row with its leaf's score; points outside the
    /// root box score 0.
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        if x.ncols() != self.n_features {
            return Err(Error::BadArguments(format!(
                "matrix has {} columns, tree has {} features",
                x.ncols(),
                self.n_features
            )));
        }
        #[cfg(feature = "parallel")]
        let scores: Vec<f32> = {
            use rayon::prelude::*;
            (0..x.nrows())
                .into_par_iter()
                .map(|i| self.score_row(x.row(i)))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let scores: Vec<f32> = (0..x.nrows()).map(|i| self.score_row(x.row(i))).collect();
        Ok(Array1::from_vec(scores))
    }

    fn score_row(&self, row: ArrayView1<'_, f32>) -> f32 {
        self.decide_row(row)
            .map(|id| self.nodes[id].score())
            .unwrap_or(0.0)
    }

    /// Collapses sibling leaves with the same refusal cause and equal
    /// scores, repeating until the tree stops shrinking.
    pub fn merge_leaves(&mut self) {
        let before = self.nodes.len();
        loop {
            let mut changed = false;
            for id in self.preorder() {
                if self.try_merge_children(id) {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.compact();
        if self.nodes.len() != before {
            debug!("merged {} nodes away", before - self.nodes.len());
        }
    }

    fn try_merge_children(&mut self, id: NodeId) -> bool {
        let NodeKind::Inner { left, right, .. } = self.nodes[id].kind else {
            return false;
        };
        let (l, r) = (&self.nodes[left], &self.nodes[right]);
        let (NodeKind::Leaf {
            rows: l_rows,
            score: l_score,
            gain_violations: l_count,
        }, NodeKind::Leaf {
            rows: r_rows,
            score: r_score,
            gain_violations: r_count,
        }) = (&l.kind, &r.kind)
        else {
            return false;
        };
        if l.cause != r.cause || (l_score - r_score).abs() > MERGE_SCORE_EPS {
            return false;
        }
        debug_assert_eq!(l_rows.end, r_rows.start);
        let rows = l_rows.start..r_rows.end;
        let total_volume = l.volume + r.volume;
        let score = if total_volume > 0.0 {
            ((*l_score as f64 * l.volume + *r_score as f64 * r.volume) / total_volume) as f32
        } else {
            *l_score
        };
        let merged = Node {
            depth: self.nodes[id].depth,
            n_samples: l.n_samples + r.n_samples,
            n_empty: l.n_empty + r.n_empty,
            volume: total_volume,
            parent: self.nodes[id].parent,
            cause: l.cause,
            kind: NodeKind::Leaf {
                rows,
                score,
                gain_violations: (*l_count).max(*r_count),
            },
        };
        self.nodes[id] = merged;
        true
    }

    /// Rebuilds the arena with only root-reachable nodes, in pre-order.
    fn compact(&mut self) {
        fn rebuild(nodes: &[Node], id: NodeId, parent: Option<NodeId>, out: &mut Vec<Node>) {
            let idx = out.len();
            let mut node = nodes[id].clone();
            node.parent = parent;
            out.push(node);
            if let NodeKind::Inner {
                split_feature,
                split_value,
                left,
                right,
            } = nodes[id].kind
            {
                let new_left = out.len();
                rebuild(nodes, left, Some(idx), out);
                let new_right = out.len();
                rebuild(nodes, right, Some(idx), out);
                out[idx].kind = NodeKind::Inner {
                    split_feature,
                    split_value,
                    left: new_left,
                    right: new_right,
                };
            }
        }
        let mut out = Vec::with_capacity(self.nodes.len());
        rebuild(&self.nodes, ROOT, None, &mut out);
        self.nodes = out;
        self.depth = self
            .nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(|node| node.depth)
            .max()
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoreKind;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn unit_square_tree(score: ScoreKind) -> Fspt {
        Fspt::new(
            vec![(0.0, 1.0), (0.0, 1.0)],
            None,
            CriterionKind::Gini,
            ScoreConfig::new(score),
        )
        .unwrap()
    }

    fn check_invariants(tree: &Fspt) {
        let leaves = tree.leaves();
        assert!(!leaves.is_empty());

        // Leaf volumes tile the root volume.
        let leaf_volume: f64 = leaves.iter().map(|&id| tree.node(id).volume).sum();
        assert_relative_eq!(leaf_volume, tree.volume(), max_relative = 1e-6);

        for id in tree.preorder() {
            let node = tree.node(id);
            let bounds = tree.node_bounds(id);
            match node.kind {
                NodeKind::Inner { left, right, .. } => {
                    assert_eq!(
                        node.n_samples,
                        tree.node(left).n_samples + tree.node(right).n_samples
                    );
                    assert_eq!(tree.node(left).depth, node.depth + 1);
                    assert_eq!(tree.node(left).parent, Some(id));
                    assert_eq!(tree.node(right).parent, Some(id));
                }
                NodeKind::Leaf { ref rows, score, .. } => {
                    assert!((0.0..=1.0).contains(&score));
                    assert_eq!(rows.len(), node.n_samples);
                    if node.n_samples == 0 {
                        assert_eq!(score, 0.0);
                    }
                    assert_ne!(node.cause, RefusalCause::None);
                    // Every sample row sits inside the leaf's box.
                    let d = tree.n_features();
                    let data = tree.samples.as_slice().unwrap();
                    for row in rows.clone() {
                        for (feature, &(lo, hi)) in bounds.iter().enumerate() {
                            let value = data[row * d + feature];
                            assert!(value >= lo && value <= hi);
                        }
                    }
                }
            }
            // The node box stays inside the root box.
            for (&(lo, hi), &(root_lo, root_hi)) in bounds.iter().zip(tree.bounds()) {
                assert!(root_lo <= lo && lo < hi && hi <= root_hi);
            }
        }
    }

    #[test]
    fn rejects_degenerate_construction() {
        assert!(Fspt::new(
            vec![],
            None,
            CriterionKind::Gini,
            ScoreConfig::default()
        )
        .is_err());
        assert!(Fspt::new(
            vec![(1.0, 1.0)],
            None,
            CriterionKind::Gini,
            ScoreConfig::default()
        )
        .is_err());
        assert!(Fspt::new(
            vec![(0.0, 1.0)],
            Some(vec![1.0, 2.0]),
            CriterionKind::Gini,
            ScoreConfig::default()
        )
        .is_err());
        assert!(Fspt::new(
            vec![(0.0, 1.0)],
            Some(vec![-1.0]),
            CriterionKind::Gini,
            ScoreConfig::default()
        )
        .is_err());
    }

    #[test]
    fn rejects_mismatched_matrix() {
        let mut tree = unit_square_tree(ScoreKind::Density);
        let x = arr2(&[[0.5f32, 0.5, 0.5]]);
        assert!(matches!(
            tree.fit(x, &GiniConfig::default()),
            Err(Error::BadArguments(_))
        ));
        let queries = arr2(&[[0.5f32]]);
        assert!(tree.predict(queries.view()).is_err());
    }

    #[test]
    fn volume_is_the_product_of_widths() {
        let tree = Fspt::new(
            vec![(0.0, 2.0), (-1.0, 1.5), (3.0, 3.5)],
            None,
            CriterionKind::Gini,
            ScoreConfig::default(),
        )
        .unwrap();
        assert_relative_eq!(tree.volume(), 2.0 * 2.5 * 0.5, max_relative = 1e-6);
    }

    #[test]
    fn single_point_stays_a_single_leaf() {
        fspt_num::rng::seed(2222222);
        let mut tree = unit_square_tree(ScoreKind::Density);
        tree.fit(arr2(&[[0.5f32, 0.5]]), &GiniConfig::default())
            .unwrap();
        assert_eq!(tree.n_nodes(), 1);
        let root = tree.node(tree.root());
        assert!(root.is_leaf());
        assert_eq!(root.cause, RefusalCause::MinSamples);
        assert_eq!(root.score(), 0.0);
        check_invariants(&tree);

        let mut tree = unit_square_tree(ScoreKind::Heuristic);
        tree.fit(arr2(&[[0.5f32, 0.5]]), &GiniConfig::default())
            .unwrap();
        assert_eq!(tree.node(tree.root()).score(), 1.0);
    }

    #[test]
    fn fit_partitions_clustered_data() {
        fspt_num::rng::seed(2222222);
        let mut tree = unit_square_tree(ScoreKind::Density);
        // Half the points crowd one corner, half spread out.
        let mut rows = Vec::new();
        for i in 0..64 {
            let t = i as f32 / 64.0;
            if i % 2 == 0 {
                rows.push([0.05 * t + 0.01, 0.05 * (1.0 - t) + 0.01]);
            } else {
                rows.push([0.1 + 0.85 * t, 0.95 - 0.85 * t]);
            }
        }
        let x = Array2::from_shape_vec((64, 2), rows.concat()).unwrap();
        let config = GiniConfig {
            min_samples: 4,
            max_depth: 8,
            ..Default::default()
        };
        tree.fit(x, &config).unwrap();

        assert!(tree.n_nodes() > 1, "clustered data should split");
        assert!(tree.depth() <= 8);
        check_invariants(&tree);

        // The corner leaf outranks a sparse region.
        let queries = arr2(&[[0.03f32, 0.03], [0.9, 0.9]]);
        let scores = tree.predict(queries.view()).unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn predict_is_idempotent_and_matches_decision() {
        fspt_num::rng::seed(7);
        let mut tree = unit_square_tree(ScoreKind::Density);
        let rows: Vec<f32> = (0..128)
            .flat_map(|i| {
                let t = i as f32 / 128.0;
                [t * t, (1.0 - t).sqrt().min(1.0)]
            })
            .collect();
        let x = Array2::from_shape_vec((128, 2), rows).unwrap();
        tree.fit(
            x,
            &GiniConfig {
                min_samples: 8,
                ..Default::default()
            },
        )
        .unwrap();

        let queries = arr2(&[[0.1f32, 0.9], [0.5, 0.5], [0.99, 0.01]]);
        let first = tree.predict(queries.view()).unwrap();
        let second = tree.predict(queries.view()).unwrap();
        assert_eq!(first, second);

        let nodes = tree.decision(queries.view()).unwrap();
        for (leaf, &score) in nodes.iter().zip(first.iter()) {
            assert_eq!(tree.node(leaf.unwrap()).score(), score);
        }
    }

    #[test]
    fn points_outside_the_box_score_zero() {
        let mut tree = unit_square_tree(ScoreKind::Heuristic);
        tree.fit(
            arr2(&[[0.4f32, 0.4], [0.6, 0.6], [0.5, 0.5]]),
            &GiniConfig::default(),
        )
        .unwrap();
        let queries = arr2(&[[1.5f32, 0.5], [0.5, -0.1]]);
        assert_eq!(tree.decision(queries.view()).unwrap(), vec![None, None]);
        let scores = tree.predict(queries.view()).unwrap();
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[1], 0.0);
    }

    fn leaf(depth: usize, parent: NodeId, rows: std::ops::Range<usize>, volume: f64, score: f32) -> Node {
        Node {
            depth,
            n_samples: rows.len(),
            n_empty: rows.len() as f32,
            volume,
            parent: Some(parent),
            cause: RefusalCause::MaxDepth,
            kind: NodeKind::Leaf {
                rows,
                score,
                gain_violations: 0,
            },
        }
    }

    #[test]
    fn merge_collapses_equivalent_siblings() {
        let mut tree = unit_square_tree(ScoreKind::Density);
        tree.samples = Array2::zeros((4, 2));
        tree.n_samples = 4;
        tree.nodes = vec![
            Node {
                depth: 0,
                n_samples: 4,
                n_empty: 4.0,
                volume: 1.0,
                parent: None,
                cause: RefusalCause::None,
                kind: NodeKind::Inner {
                    split_feature: 0,
                    split_value: 0.5,
                    left: 1,
                    right: 2,
                },
            },
            leaf(1, 0, 0..2, 0.5, 0.25),
            leaf(1, 0, 2..4, 0.5, 0.25),
        ];
        tree.depth = 1;
        tree.merge_leaves();

        assert_eq!(tree.n_nodes(), 1);
        let root = tree.node(tree.root());
        assert!(root.is_leaf());
        assert_eq!(root.n_samples, 4);
        assert_relative_eq!(root.volume, 1.0);
        assert_eq!(root.cause, RefusalCause::MaxDepth);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn merge_cascades_bottom_up() {
        let mut tree = unit_square_tree(ScoreKind::Density);
        tree.samples = Array2::zeros((8, 2));
        tree.n_samples = 8;
        let inner = |parent: Option<NodeId>, depth, feature, value, left, right, rows: std::ops::Range<usize>| Node {
            depth,
            n_samples: rows.len(),
            n_empty: rows.len() as f32,
            volume: 1.0 / (1 << depth) as f64,
            parent,
            cause: RefusalCause::None,
            kind: NodeKind::Inner {
                split_feature: feature,
                split_value: value,
                left,
                right,
            },
        };
        tree.nodes = vec![
            inner(None, 0, 0, 0.5, 1, 2, 0..8),
            inner(Some(0), 1, 1, 0.5, 3, 4, 0..4),
            inner(Some(0), 1, 1, 0.5, 5, 6, 4..8),
            leaf(2, 1, 0..2, 0.25, 0.5),
            leaf(2, 1, 2..4, 0.25, 0.5),
            leaf(2, 2, 4..6, 0.25, 0.5),
            leaf(2, 2, 6..8, 0.25, 0.5),
        ];
        tree.depth = 2;
        tree.merge_leaves();

        assert_eq!(tree.n_nodes(), 1);
        assert!(tree.node(tree.root()).is_leaf());
        assert_eq!(tree.node(tree.root()).n_samples, 8);
    }

    #[test]
    fn merge_keeps_distinct_siblings() {
        let mut tree = unit_square_tree(ScoreKind::Density);
        tree.samples = Array2::zeros((4, 2));
        tree.n_samples = 4;
        tree.nodes = vec![
            Node {
                depth: 0,
                n_samples: 4,
                n_empty: 4.0,
                volume: 1.0,
                parent: None,
                cause: RefusalCause::None,
                kind: NodeKind::Inner {
                    split_feature: 0,
                    split_value: 0.5,
                    left: 1,
                    right: 2,
                },
            },
            leaf(1, 0, 0..2, 0.5, 0.9),
            leaf(1, 0, 2..4, 0.5, 0.2),
        ];
        tree.depth = 1;
        tree.merge_leaves();
        assert_eq!(tree.n_nodes(), 3);
    }

    #[test]
    fn max_depth_bounds_the_tree() {
        fspt_num::rng::seed(11);
        let mut tree = unit_square_tree(ScoreKind::Density);
        let rows: Vec<f32> = (0..256)
            .flat_map(|i| {
                let t = (i as f32 / 256.0).powi(3);
                [t, t]
            })
            .collect();
        let x = Array2::from_shape_vec((256, 2), rows).unwrap();
        tree.fit(
            x,
            &GiniConfig {
                min_samples: 1,
                max_depth: 4,
                gini_gain_thresh: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(tree.depth() <= 4);
        check_invariants(&tree);
        assert!(tree
            .leaves()
            .iter()
            .any(|&id| tree.node(id).cause == RefusalCause::MaxDepth));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::sync::OnceLock;

        fn fitted() -> &'static Fspt {
            static TREE: OnceLock<Fspt> = OnceLock::new();
            TREE.get_or_init(|| {
                fspt_num::rng::seed(2222222);
                let mut tree = unit_square_tree(ScoreKind::Density);
                let rows: Vec<f32> = (0..512)
                    .flat_map(|i| {
                        let t = i as f32 / 512.0;
                        if i % 2 == 0 {
                            [t * 0.2, t * 0.15]
                        } else {
                            [t, (1.0 - t) * 0.9]
                        }
                    })
                    .collect();
                let x = Array2::from_shape_vec((512, 2), rows).unwrap();
                tree.fit(
                    x,
                    &GiniConfig {
                        min_samples: 10,
                        max_depth: 10,
                        ..Default::default()
                    },
                )
                .unwrap();
                tree
            })
        }

        proptest! {
            #[test]
            fn predictions_stay_in_unit_interval(
                raw in prop::collection::vec(-0.5f32..1.5, 0..64)
            ) {
                let tree = fitted();
                let n = raw.len() / 2;
                let x = Array2::from_shape_vec((n, 2), raw[..n * 2].to_vec()).unwrap();
                let scores = tree.predict(x.view()).unwrap();
                for (row, &score) in scores.iter().enumerate() {
                    prop_assert!((0.0..=1.0).contains(&score));
                    // Outside the box means no evidence at all.
                    let outside = x.row(row).iter().any(|v| !(0.0..=1.0).contains(v));
                    if outside {
                        prop_assert_eq!(score, 0.0);
                    }
                }
            }
        }
    }
}
