//! Tree nodes.
//!
//! Nodes live in the tree's arena (`Vec<Node>`) and reference each other
//! by index, so the structure is cycle-free by construction: children
//! are owned by the arena, parent links are plain back-indices.

use std::ops::Range;

/// Index of a node in the tree arena.
pub type NodeId = usize;

/// Why fitting stopped at a leaf.
///
/// `None` means the leaf could still have been split: either the root of
/// a trivial tree or a node whose split was simply never forced shut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum RefusalCause {
    None,
    NoSample,
    MinSamples,
    MaxDepth,
    MinVolume,
    MinLength,
    MaxCount,
    Uniformity,
    Unknown,
}

impl RefusalCause {
    pub(crate) fn to_tag(self) -> i32 {
        match self {
            RefusalCause::None => 0,
            RefusalCause::NoSample => 1,
            RefusalCause::MinSamples => 2,
            RefusalCause::MaxDepth => 3,
            RefusalCause::MinVolume => 4,
            RefusalCause::MinLength => 5,
            RefusalCause::MaxCount => 6,
            RefusalCause::Uniformity => 7,
            RefusalCause::Unknown => 8,
        }
    }

    pub(crate) fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => RefusalCause::None,
            1 => RefusalCause::NoSample,
            2 => RefusalCause::MinSamples,
            3 => RefusalCause::MaxDepth,
            4 => RefusalCause::MinVolume,
            5 => RefusalCause::MinLength,
            6 => RefusalCause::MaxCount,
            7 => RefusalCause::Uniformity,
            8 => RefusalCause::Unknown,
            _ => return None,
        })
    }
}

/// A node of the partitioning tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Distance from the root; the root sits at 0.
    pub depth: usize,
    /// Training points inside this node's box.
    pub n_samples: usize,
    /// Effective count of uniform reference points inside the box.
    /// Equals `n_samples` at the root and is split proportionally to
    /// volume afterwards, hence fractional.
    pub n_empty: f32,
    /// Product of the box's per-feature widths.
    pub volume: f64,
    /// Back-reference; `None` for the root.
    pub parent: Option<NodeId>,
    pub cause: RefusalCause,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Inner {
        split_feature: usize,
        split_value: f32,
        left: NodeId,
        right: NodeId,
    },
    Leaf {
        /// Row range of this leaf's points in the tree's sample matrix.
        rows: Range<usize>,
        /// Assigned post-fit, in `[0, 1]`.
        score: f32,
        /// Consecutive low-gain splits on the path down to this leaf.
        gain_violations: u32,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// The leaf's score; 0 for inner nodes.
    pub fn score(&self) -> f32 {
        match self.kind {
            NodeKind::Leaf { score, .. } => score,
            NodeKind::Inner { .. } => 0.0,
        }
    }
}
